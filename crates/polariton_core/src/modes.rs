//! Nodes of the cavity mode graph.
//!
//! Polaritons and phonons are stored in two arenas owned by the cavity. Every link between
//! nodes (neighbor hopping, phonon pairings) is a stable index into those arenas, so cycles
//! such as A -> B -> A carry no ownership.

use crate::error::{CavityError, NodeKind, Result};
use crate::reservoir::Reservoir;
use num_complex::Complex64;

/// Index of a polariton in its cavity's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolaritonId(pub usize);

/// Index of a phonon in its cavity's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhononId(pub usize);

impl PolaritonId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl PhononId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One hopping term `(J + g·x)·exp(i·sign·(Ω + δ)·t)·φ_target` in a polariton's equation.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborLink {
    pub target: PolaritonId,
    pub phonon: PhononId,
    pub coupling: Complex64,
    pub phonon_coupling: Complex64,
    pub detuning: f64,
    /// +1 when the target lies above this mode in the rotating frame, -1 below.
    pub sign: f64,
}

/// A polariton pair exerting backaction on a phonon.
#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    pub modes: [PolaritonId; 2],
    pub coupling: f64,
    pub detuning: f64,
}

/// Coherent drive `amplitude·exp(i·detuning·t)` in the rotating frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Driving {
    pub amplitude: Complex64,
    pub detuning: f64,
}

/// Reservoir together with the strength `κ` with which it shifts its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedReservoir {
    pub coupling: f64,
    pub reservoir: Reservoir,
}

/// A driven-dissipative bosonic mode with complex amplitude.
#[derive(Debug, Clone, PartialEq)]
pub struct PolaritonMode {
    value: Complex64,
    dissipation_rate: f64,
    nonlinearity: f64,
    driving: Driving,
    links: Vec<NeighborLink>,
    reservoir: Option<AttachedReservoir>,
}

impl PolaritonMode {
    pub fn new(gamma: f64, nonlinearity: f64) -> Self {
        Self {
            value: Complex64::new(0.0, 0.0),
            dissipation_rate: gamma,
            nonlinearity,
            driving: Driving::default(),
            links: Vec::new(),
            reservoir: None,
        }
    }

    pub fn with_value(mut self, value: Complex64) -> Self {
        self.value = value;
        self
    }

    pub fn value(&self) -> Complex64 {
        self.value
    }

    pub fn set_value(&mut self, value: Complex64) {
        self.value = value;
    }

    pub fn dissipation_rate(&self) -> f64 {
        self.dissipation_rate
    }

    pub fn nonlinearity(&self) -> f64 {
        self.nonlinearity
    }

    pub fn driving(&self) -> Driving {
        self.driving
    }

    pub fn set_driving(&mut self, amplitude: impl Into<Complex64>, detuning: f64) {
        self.driving = Driving {
            amplitude: amplitude.into(),
            detuning,
        };
    }

    /// Appends a hopping link to `target` modulated by `phonon`'s displacement.
    /// `above` selects the sign of the rotating-frame phase.
    pub fn connect(
        &mut self,
        target: PolaritonId,
        phonon: PhononId,
        coupling: impl Into<Complex64>,
        phonon_coupling: impl Into<Complex64>,
        detuning: f64,
        above: bool,
    ) {
        self.links.push(NeighborLink {
            target,
            phonon,
            coupling: coupling.into(),
            phonon_coupling: phonon_coupling.into(),
            detuning,
            sign: if above { 1.0 } else { -1.0 },
        });
    }

    pub fn links(&self) -> &[NeighborLink] {
        &self.links
    }

    pub fn neighbor_count(&self) -> usize {
        self.links.len()
    }

    /// Attaches a reservoir with coupling `kappa`. A mode holds at most one reservoir; use
    /// [`PolaritonMode::replace_reservoir`] to swap it deliberately.
    ///
    /// `index` only labels the error.
    pub fn add_reservoir(
        &mut self,
        index: usize,
        kappa: f64,
        tau: f64,
        pump_power: f64,
        alpha: f64,
        initial: f64,
    ) -> Result<()> {
        if self.reservoir.is_some() {
            return Err(CavityError::ReservoirAlreadyAttached { index });
        }
        self.replace_reservoir(kappa, Reservoir::new(tau, pump_power, alpha, initial));
        Ok(())
    }

    pub fn replace_reservoir(&mut self, kappa: f64, reservoir: Reservoir) -> Option<Reservoir> {
        self.reservoir
            .replace(AttachedReservoir {
                coupling: kappa,
                reservoir,
            })
            .map(|old| old.reservoir)
    }

    pub fn reservoir(&self) -> Option<&Reservoir> {
        self.reservoir.as_ref().map(|r| &r.reservoir)
    }

    pub fn reservoir_mut(&mut self) -> Option<&mut Reservoir> {
        self.reservoir.as_mut().map(|r| &mut r.reservoir)
    }

    pub fn reservoir_coupling(&self) -> f64 {
        self.reservoir.as_ref().map_or(0.0, |r| r.coupling)
    }

    pub fn has_reservoir(&self) -> bool {
        self.reservoir.is_some()
    }

    /// Validates this mode against the arena sizes it will live in.
    pub fn check(&self, index: usize, polaritons: usize, phonons: usize) -> Result<()> {
        let fail = |reason: String| CavityError::InconsistentPolariton { index, reason };

        if !(self.dissipation_rate.is_finite() && self.dissipation_rate >= 0.0) {
            return Err(fail(format!(
                "dissipation rate must be finite and non-negative, got {}",
                self.dissipation_rate
            )));
        }
        if !self.nonlinearity.is_finite() {
            return Err(fail("nonlinearity is not finite".into()));
        }
        if !(is_finite(self.value) && is_finite(self.driving.amplitude))
            || !self.driving.detuning.is_finite()
        {
            return Err(fail("value or driving is not finite".into()));
        }

        for (k, link) in self.links.iter().enumerate() {
            if link.target.0 >= polaritons {
                return Err(fail(format!(
                    "link {k} targets polariton {} but only {polaritons} exist",
                    link.target.0
                )));
            }
            if link.phonon.0 >= phonons {
                return Err(fail(format!(
                    "link {k} references phonon {} but only {phonons} exist",
                    link.phonon.0
                )));
            }
            if link.sign.abs() != 1.0 {
                return Err(fail(format!("link {k} has sign {}", link.sign)));
            }
            if !(is_finite(link.coupling)
                && is_finite(link.phonon_coupling)
                && link.detuning.is_finite())
            {
                return Err(fail(format!("link {k} has non-finite parameters")));
            }
        }

        if let Some(attached) = &self.reservoir {
            if !(attached.coupling.is_finite() && attached.reservoir.is_finite()) {
                return Err(fail("reservoir has non-finite parameters".into()));
            }
        }
        Ok(())
    }
}

/// A classical damped oscillator driven by polariton-pair backaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PhononMode {
    position: f64,
    velocity: f64,
    frequency: f64,
    damping: f64,
    pairings: Vec<Pairing>,
}

impl PhononMode {
    pub fn new(frequency: f64, damping: f64) -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            frequency,
            damping,
            pairings: Vec::new(),
        }
    }

    pub fn with_state(mut self, position: f64, velocity: f64) -> Self {
        self.position = position;
        self.velocity = velocity;
        self
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn set_position(&mut self, x: f64) {
        self.position = x;
    }

    pub fn set_velocity(&mut self, v: f64) {
        self.velocity = v;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    pub fn add_pairing(&mut self, a: PolaritonId, b: PolaritonId, coupling: f64, detuning: f64) {
        self.pairings.push(Pairing {
            modes: [a, b],
            coupling,
            detuning,
        });
    }

    pub fn pairings(&self) -> &[Pairing] {
        &self.pairings
    }

    pub fn check(&self, index: usize, polaritons: usize) -> Result<()> {
        let fail = |reason: String| CavityError::InconsistentPhonon { index, reason };

        if !(self.frequency.is_finite() && self.damping.is_finite()) {
            return Err(fail("frequency or damping is not finite".into()));
        }
        if self.damping < 0.0 {
            return Err(fail(format!("damping must be non-negative, got {}", self.damping)));
        }
        if !(self.position.is_finite() && self.velocity.is_finite()) {
            return Err(fail("position or velocity is not finite".into()));
        }
        for (k, pairing) in self.pairings.iter().enumerate() {
            if let Some(missing) = pairing.modes.iter().find(|m| m.0 >= polaritons) {
                return Err(fail(format!(
                    "pairing {k} references polariton {} but only {polaritons} exist",
                    missing.0
                )));
            }
            if !(pairing.coupling.is_finite() && pairing.detuning.is_finite()) {
                return Err(fail(format!("pairing {k} has non-finite parameters")));
            }
        }
        Ok(())
    }
}

/// The two node arenas. Insertion order is the packing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeGraph {
    pub(crate) polaritons: Vec<PolaritonMode>,
    pub(crate) phonons: Vec<PhononMode>,
}

impl ModeGraph {
    pub fn new(polaritons: Vec<PolaritonMode>, phonons: Vec<PhononMode>) -> Self {
        Self {
            polaritons,
            phonons,
        }
    }

    pub fn polaritons(&self) -> &[PolaritonMode] {
        &self.polaritons
    }

    pub fn phonons(&self) -> &[PhononMode] {
        &self.phonons
    }

    pub fn polariton(&self, index: usize) -> Result<&PolaritonMode> {
        let len = self.polaritons.len();
        self.polaritons.get(index).ok_or(CavityError::IndexOutOfRange {
            kind: NodeKind::Polariton,
            index,
            len,
        })
    }

    pub fn phonon(&self, index: usize) -> Result<&PhononMode> {
        let len = self.phonons.len();
        self.phonons.get(index).ok_or(CavityError::IndexOutOfRange {
            kind: NodeKind::Phonon,
            index,
            len,
        })
    }

    pub fn polariton_mut(&mut self, index: usize) -> Result<&mut PolaritonMode> {
        let len = self.polaritons.len();
        self.polaritons
            .get_mut(index)
            .ok_or(CavityError::IndexOutOfRange {
                kind: NodeKind::Polariton,
                index,
                len,
            })
    }

    pub fn phonon_mut(&mut self, index: usize) -> Result<&mut PhononMode> {
        let len = self.phonons.len();
        self.phonons.get_mut(index).ok_or(CavityError::IndexOutOfRange {
            kind: NodeKind::Phonon,
            index,
            len,
        })
    }

    pub fn reservoir_count(&self) -> usize {
        self.polaritons.iter().filter(|p| p.has_reservoir()).count()
    }

    /// Runs every node's consistency check.
    pub fn check(&self) -> Result<()> {
        let (np, nph) = (self.polaritons.len(), self.phonons.len());
        for (i, p) in self.polaritons.iter().enumerate() {
            p.check(i, np, nph)?;
        }
        for (j, ph) in self.phonons.iter().enumerate() {
            ph.check(j, np)?;
        }
        Ok(())
    }
}

fn is_finite(z: Complex64) -> bool {
    z.re.is_finite() && z.im.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_appends_one_record_per_link() {
        let mut mode = PolaritonMode::new(1.0, 0.0);
        mode.connect(PolaritonId(1), PhononId(0), 5.0, 1.0, 0.0, true);
        mode.connect(PolaritonId(2), PhononId(0), 0.0, Complex64::new(0.0, 2.0), 0.5, false);

        assert_eq!(mode.neighbor_count(), 2);
        assert_eq!(mode.links()[0].sign, 1.0);
        assert_eq!(mode.links()[1].sign, -1.0);
        assert_eq!(mode.links()[1].phonon_coupling, Complex64::new(0.0, 2.0));
        assert!(mode.check(0, 3, 1).is_ok());
    }

    #[test]
    fn check_rejects_dangling_links() {
        let mut mode = PolaritonMode::new(1.0, 0.0);
        mode.connect(PolaritonId(4), PhononId(0), 1.0, 1.0, 0.0, true);
        let err = mode.check(0, 2, 1).unwrap_err();
        assert!(matches!(err, CavityError::InconsistentPolariton { index: 0, .. }));

        let mut mode = PolaritonMode::new(1.0, 0.0);
        mode.connect(PolaritonId(1), PhononId(3), 1.0, 1.0, 0.0, true);
        assert!(mode.check(0, 2, 1).is_err());

        let mut phonon = PhononMode::new(20.0, 0.05);
        phonon.add_pairing(PolaritonId(0), PolaritonId(2), 1.0, 0.0);
        let err = phonon.check(0, 2).unwrap_err();
        assert!(err.to_string().contains("polariton 2"));
    }

    #[test]
    fn check_rejects_negative_rates() {
        assert!(PolaritonMode::new(-1.0, 0.0).check(0, 1, 0).is_err());
        assert!(PolaritonMode::new(f64::NAN, 0.0).check(0, 1, 0).is_err());
        assert!(PhononMode::new(20.0, -0.1).check(0, 0).is_err());
    }

    #[test]
    fn second_reservoir_is_flagged_not_replaced() {
        let mut mode = PolaritonMode::new(1.0, 0.0);
        mode.add_reservoir(3, 1.0, 600.0, 2.0, 1.5, 0.1).unwrap();
        let err = mode.add_reservoir(3, 1.0, 1.0, 9.0, 1.0, 0.0).unwrap_err();
        assert_eq!(err, CavityError::ReservoirAlreadyAttached { index: 3 });
        assert_eq!(mode.reservoir().map(|r| r.pump_power()), Some(2.0));

        let old = mode.replace_reservoir(0.5, Reservoir::new(1.0, 9.0, 1.0, 0.0));
        assert_eq!(old.map(|r| r.pump_power()), Some(2.0));
        assert_eq!(mode.reservoir_coupling(), 0.5);
    }

    #[test]
    fn graph_lookup_reports_out_of_range() {
        let graph = ModeGraph::new(vec![PolaritonMode::new(1.0, 0.0)], vec![]);
        assert!(graph.polariton(0).is_ok());
        assert_eq!(
            graph.phonon(0).unwrap_err(),
            CavityError::IndexOutOfRange {
                kind: NodeKind::Phonon,
                index: 0,
                len: 0
            }
        );
    }
}
