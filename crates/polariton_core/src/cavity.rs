use crate::codec::StateLayout;
use crate::error::{CavityError, Result};
use crate::modes::{ModeGraph, PhononId, PhononMode, PolaritonId, PolaritonMode};
use crate::rhs::CavityRhs;
use crate::solvers::{StepController, Tsit5, RK4};
use crate::traits::{AdaptiveSteppable, DynamicalSystem, StepOutcome, Steppable, Tolerances};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Tolerances and step-size bounds for [`Cavity::adaptive_step`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub tolerances: Tolerances,
    /// First adaptive step attempted after construction.
    pub initial_step: f64,
    pub min_step: f64,
    /// Cap on the adaptive step size; `None` means unbounded.
    pub max_step: Option<f64>,
    /// Consecutive rejections tolerated within one adaptive step.
    pub max_rejections: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            initial_step: 1e-3,
            min_step: 1e-12,
            max_step: None,
            max_rejections: 100,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<()> {
        let Tolerances { abs, rel } = self.tolerances;
        if !(abs.is_finite() && rel.is_finite() && abs >= 0.0 && rel >= 0.0) {
            return Err(CavityError::InvalidSettings(
                "tolerances must be finite and non-negative".into(),
            ));
        }
        if abs == 0.0 && rel == 0.0 {
            return Err(CavityError::InvalidSettings(
                "at least one tolerance must be positive".into(),
            ));
        }
        if !(self.initial_step.is_finite() && self.initial_step > 0.0) {
            return Err(CavityError::InvalidSettings(
                "initial_step must be finite and positive".into(),
            ));
        }
        if !(self.min_step >= 0.0 && self.min_step < self.initial_step) {
            return Err(CavityError::InvalidSettings(
                "min_step must be non-negative and below initial_step".into(),
            ));
        }
        if let Some(max_step) = self.max_step {
            if !(max_step >= self.initial_step) {
                return Err(CavityError::InvalidSettings(
                    "max_step must not be below initial_step".into(),
                ));
            }
        }
        if self.max_rejections == 0 {
            return Err(CavityError::InvalidSettings(
                "max_rejections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one accepted adaptive step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step size actually taken.
    pub dt: f64,
    /// Normalized embedded error estimate of the accepted step (≤ 1).
    pub error: f64,
    /// Step size that the next adaptive step will try first.
    pub next_dt: f64,
    /// Rejected attempts before acceptance.
    pub rejections: usize,
    /// Time after the step.
    pub time: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub fixed_steps: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Time covered by accepted adaptive steps.
    pub adaptive_time: f64,
}

impl IntegrationStats {
    /// Mean accepted adaptive step size, if any step was accepted.
    pub fn mean_adaptive_step(&self) -> Option<f64> {
        (self.accepted > 0).then(|| self.adaptive_time / self.accepted as f64)
    }
}

/// Owns the mode graph, its flat state vector and the integrators that advance it.
///
/// Node order is fixed at construction and defines the packing order for the lifetime of
/// the cavity.
pub struct Cavity {
    graph: ModeGraph,
    layout: StateLayout,
    state: Vec<f64>,
    time: f64,
    settings: IntegratorSettings,
    rk4: RK4<f64>,
    tsit5: Tsit5<f64>,
    step_size: f64,
    last_step: f64,
    stats: IntegrationStats,
    backup: Vec<f64>,
    // Set by the `*_mut` accessors; the topology is re-checked before the next evaluation.
    graph_touched: bool,
}

impl Cavity {
    pub fn new(polaritons: Vec<PolaritonMode>, phonons: Vec<PhononMode>, t0: f64) -> Result<Self> {
        Self::with_settings(polaritons, phonons, t0, IntegratorSettings::default())
    }

    /// Validates every node, sizes the state vector and packs the initial conditions.
    pub fn with_settings(
        polaritons: Vec<PolaritonMode>,
        phonons: Vec<PhononMode>,
        t0: f64,
        settings: IntegratorSettings,
    ) -> Result<Self> {
        settings.validate()?;
        if !t0.is_finite() {
            return Err(CavityError::NonFinite { time: t0 });
        }

        let graph = ModeGraph::new(polaritons, phonons);
        graph.check()?;

        let layout = StateLayout::new(&graph);
        let dim = layout.dimension();
        let mut state = vec![0.0; dim];
        layout.pack(&graph, &mut state)?;

        let controller = StepController {
            max_step: settings.max_step,
            ..StepController::default()
        };

        info!(
            polaritons = layout.polariton_count(),
            phonons = layout.phonon_count(),
            reservoirs = layout.reservoir_count(),
            dimension = dim,
            "cavity constructed"
        );

        Ok(Self {
            graph,
            layout,
            backup: state.clone(),
            state,
            time: t0,
            settings,
            rk4: RK4::new(dim),
            tsit5: Tsit5::new(dim).with_controller(controller),
            step_size: settings.initial_step,
            last_step: settings.initial_step,
            stats: IntegrationStats::default(),
            graph_touched: false,
        })
    }

    pub fn dimension(&self) -> usize {
        self.layout.dimension()
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn graph(&self) -> &ModeGraph {
        &self.graph
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn stats(&self) -> &IntegrationStats {
        &self.stats
    }

    /// Size of the most recent step: `dt` for fixed steps, the accepted size for adaptive ones.
    pub fn last_step_size(&self) -> f64 {
        self.last_step
    }

    /// Size the next adaptive step will attempt.
    pub fn next_step_size(&self) -> f64 {
        self.step_size
    }

    pub fn set_step_size(&mut self, dt: f64) -> Result<()> {
        if !(dt.is_finite() && dt > self.settings.min_step) {
            return Err(CavityError::InvalidSettings(format!(
                "adaptive step size must be finite and above {:e}, got {dt}",
                self.settings.min_step
            )));
        }
        self.step_size = self.settings.max_step.map_or(dt, |cap| dt.min(cap));
        Ok(())
    }

    pub fn polariton_count(&self) -> usize {
        self.layout.polariton_count()
    }

    pub fn phonon_count(&self) -> usize {
        self.layout.phonon_count()
    }

    pub fn reservoir_count(&self) -> usize {
        self.layout.reservoir_count()
    }

    pub fn polariton(&self, index: usize) -> Result<&PolaritonMode> {
        self.graph.polariton(index)
    }

    pub fn phonon(&self, index: usize) -> Result<&PhononMode> {
        self.graph.phonon(index)
    }

    /// Direct access to a node. Changes to dynamical values only reach the integrator after
    /// [`Cavity::pack`]. Links added here are validated before the next step, which fails
    /// instead of evaluating a broken graph.
    pub fn polariton_mut(&mut self, index: usize) -> Result<&mut PolaritonMode> {
        let mode = self.graph.polariton_mut(index)?;
        self.graph_touched = true;
        Ok(mode)
    }

    /// See [`Cavity::polariton_mut`].
    pub fn phonon_mut(&mut self, index: usize) -> Result<&mut PhononMode> {
        let mode = self.graph.phonon_mut(index)?;
        self.graph_touched = true;
        Ok(mode)
    }

    /// Repacks the state vector from the node values.
    ///
    /// Fails if the graph no longer validates or its reservoir set differs from the one the
    /// layout was built with.
    pub fn pack(&mut self) -> Result<()> {
        self.check_structure()?;
        self.graph_touched = false;
        self.layout.pack(&self.graph, &mut self.state)
    }

    /// Fails if the graph no longer matches the layout fixed at construction.
    pub(crate) fn ensure_consistent(&self) -> Result<()> {
        if self.graph_touched {
            self.check_structure()
        } else {
            Ok(())
        }
    }

    fn revalidate(&mut self) -> Result<()> {
        self.ensure_consistent()?;
        self.graph_touched = false;
        Ok(())
    }

    fn check_structure(&self) -> Result<()> {
        self.graph.check()?;
        if StateLayout::new(&self.graph) != self.layout {
            let index = (0..self.graph.polaritons().len())
                .find(|&i| {
                    self.graph.polaritons()[i].has_reservoir()
                        != self.layout.reservoir_slot(i).is_some()
                })
                .unwrap_or(0);
            return Err(CavityError::InconsistentPolariton {
                index,
                reason: "reservoir set changed after construction".into(),
            });
        }
        Ok(())
    }

    /// Replaces the state vector and writes it into the nodes.
    pub fn unpack(&mut self, state: &[f64]) -> Result<()> {
        self.layout.unpack(state, &mut self.graph)?;
        self.state.copy_from_slice(state);
        Ok(())
    }

    /// Evaluates the time derivative at the current state and time.
    pub fn derivative(&self) -> Result<Vec<f64>> {
        self.ensure_consistent()?;
        let rhs = CavityRhs::new(&self.graph, &self.layout);
        let mut out = vec![0.0; rhs.dimension()];
        rhs.apply(self.time, &self.state, &mut out);
        Ok(out)
    }

    /// One classical RK4 step of size `dt`.
    pub fn step(&mut self, dt: f64) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(CavityError::InvalidSettings(format!(
                "fixed step size must be finite and positive, got {dt}"
            )));
        }
        self.revalidate()?;
        self.backup.copy_from_slice(&self.state);
        let t0 = self.time;
        {
            let rhs = CavityRhs::new(&self.graph, &self.layout);
            self.rk4.step(&rhs, &mut self.time, &mut self.state, dt);
        }
        self.commit(t0)?;
        self.last_step = dt;
        self.stats.fixed_steps += 1;
        Ok(())
    }

    /// One embedded-pair step at the internally tracked step size, retrying with smaller
    /// sizes until the error estimate meets the tolerances.
    pub fn adaptive_step(&mut self) -> Result<StepReport> {
        self.revalidate()?;
        let tol = self.settings.tolerances;
        let mut rejections = 0usize;

        loop {
            self.backup.copy_from_slice(&self.state);
            let t0 = self.time;
            let outcome = {
                let rhs = CavityRhs::new(&self.graph, &self.layout);
                self.tsit5.try_step(
                    &rhs,
                    &mut self.time,
                    &mut self.state,
                    &mut self.step_size,
                    &tol,
                )
            };

            match outcome {
                StepOutcome::Accepted { dt, error } => {
                    self.commit(t0)?;
                    self.last_step = dt;
                    self.stats.accepted += 1;
                    self.stats.adaptive_time += dt;
                    return Ok(StepReport {
                        dt,
                        error,
                        next_dt: self.step_size,
                        rejections,
                        time: self.time,
                    });
                }
                StepOutcome::Rejected { dt, error } => {
                    rejections += 1;
                    self.stats.rejected += 1;
                    debug!(t = t0, dt, error, next_dt = self.step_size, "adaptive step rejected");

                    if self.step_size < self.settings.min_step {
                        warn!(t = t0, dt = self.step_size, "adaptive step size underflow");
                        return Err(CavityError::StepSizeUnderflow {
                            dt: self.step_size,
                            min_step: self.settings.min_step,
                        });
                    }
                    if rejections >= self.settings.max_rejections {
                        warn!(t = t0, rejections, "adaptive step gave up");
                        return Err(CavityError::TooManyRejections {
                            attempts: rejections,
                            dt: self.step_size,
                        });
                    }
                }
            }
        }
    }

    /// Publishes a freshly integrated state to the nodes, or rolls back to `backup` if it is
    /// not finite.
    fn commit(&mut self, t0: f64) -> Result<()> {
        if !self.state.iter().all(|v| v.is_finite()) {
            let failed_at = self.time;
            self.state.copy_from_slice(&self.backup);
            self.time = t0;
            warn!(t = t0, "integration produced non-finite state");
            return Err(CavityError::NonFinite { time: failed_at });
        }
        self.layout.unpack(&self.state, &mut self.graph)
    }
}

/// Collects nodes and links before the cavity exists.
///
/// Ids returned by `add_polariton`/`add_phonon` are the arena indices the cavity will use.
#[derive(Debug, Clone, Default)]
pub struct CavityBuilder {
    graph: ModeGraph,
    settings: IntegratorSettings,
}

impl CavityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: IntegratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut IntegratorSettings {
        &mut self.settings
    }

    pub fn graph(&self) -> &ModeGraph {
        &self.graph
    }

    pub fn add_polariton(&mut self, mode: PolaritonMode) -> PolaritonId {
        self.graph.polaritons.push(mode);
        PolaritonId(self.graph.polaritons.len() - 1)
    }

    pub fn add_phonon(&mut self, mode: PhononMode) -> PhononId {
        self.graph.phonons.push(mode);
        PhononId(self.graph.phonons.len() - 1)
    }

    pub fn polariton_mut(&mut self, id: PolaritonId) -> Result<&mut PolaritonMode> {
        self.graph.polariton_mut(id.0)
    }

    pub fn phonon_mut(&mut self, id: PhononId) -> Result<&mut PhononMode> {
        self.graph.phonon_mut(id.0)
    }

    fn ensure_polariton(&self, id: PolaritonId) -> Result<()> {
        self.graph.polariton(id.0).map(|_| ())
    }

    fn ensure_phonon(&self, id: PhononId) -> Result<()> {
        self.graph.phonon(id.0).map(|_| ())
    }

    /// Adds the link `from -> to` modulated by `phonon`. Links are directional; connect
    /// both ways for a symmetric hopping.
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        &mut self,
        from: PolaritonId,
        to: PolaritonId,
        phonon: PhononId,
        coupling: impl Into<Complex64>,
        phonon_coupling: impl Into<Complex64>,
        detuning: f64,
        above: bool,
    ) -> Result<()> {
        self.ensure_polariton(to)?;
        self.ensure_phonon(phonon)?;
        self.polariton_mut(from)?
            .connect(to, phonon, coupling, phonon_coupling, detuning, above);
        Ok(())
    }

    pub fn add_pairing(
        &mut self,
        phonon: PhononId,
        a: PolaritonId,
        b: PolaritonId,
        coupling: f64,
        detuning: f64,
    ) -> Result<()> {
        self.ensure_polariton(a)?;
        self.ensure_polariton(b)?;
        self.phonon_mut(phonon)?.add_pairing(a, b, coupling, detuning);
        Ok(())
    }

    pub fn add_reservoir(
        &mut self,
        polariton: PolaritonId,
        kappa: f64,
        tau: f64,
        pump_power: f64,
        alpha: f64,
        initial: f64,
    ) -> Result<()> {
        self.polariton_mut(polariton)?
            .add_reservoir(polariton.0, kappa, tau, pump_power, alpha, initial)
    }

    pub fn set_driving(
        &mut self,
        polariton: PolaritonId,
        amplitude: impl Into<Complex64>,
        detuning: f64,
    ) -> Result<()> {
        self.polariton_mut(polariton)?.set_driving(amplitude, detuning);
        Ok(())
    }

    pub fn build(self, t0: f64) -> Result<Cavity> {
        let ModeGraph {
            polaritons,
            phonons,
        } = self.graph;
        Cavity::with_settings(polaritons, phonons, t0, self.settings)
    }
}
