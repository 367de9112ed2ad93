use crate::codec::{GraphState, StateLayout};
use crate::modes::{ModeGraph, PhononMode, PolaritonMode};
use crate::traits::DynamicalSystem;
use num_complex::Complex64;
use std::cell::RefCell;

/// Right-hand side of the cavity equations in the rotating frame.
///
/// The graph supplies topology and constants; dynamical values come only from the trial
/// vector passed to `apply`, which is decoded in full into a scratch buffer before any
/// derivative is formed. Evaluation is therefore a pure function of `(t, x)`.
pub struct CavityRhs<'a> {
    graph: &'a ModeGraph,
    layout: &'a StateLayout,
    // Interior mutability so `apply(&self, ..)` can reuse the decode buffer.
    scratch: RefCell<GraphState>,
}

impl<'a> CavityRhs<'a> {
    pub fn new(graph: &'a ModeGraph, layout: &'a StateLayout) -> Self {
        Self {
            graph,
            layout,
            scratch: RefCell::new(GraphState::with_layout(layout)),
        }
    }

    fn polariton_derivative(
        &self,
        index: usize,
        mode: &PolaritonMode,
        values: &GraphState,
        t: f64,
    ) -> Complex64 {
        let phi = values.polaritons[index];
        let n = self
            .layout
            .reservoir_slot(index)
            .map_or(0.0, |slot| values.reservoirs[slot]);

        // φ·(−iγ + U|φ|² + iκn)
        let local = Complex64::new(
            mode.nonlinearity() * phi.norm_sqr(),
            mode.reservoir_coupling() * n - mode.dissipation_rate(),
        );
        let driving = mode.driving();
        let mut drv =
            phi * local + driving.amplitude * Complex64::from_polar(1.0, driving.detuning * t);

        for link in mode.links() {
            let phonon = &self.graph.phonons[link.phonon.0];
            let x = values.phonons[link.phonon.0].0;
            let phase = link.sign * (phonon.frequency() + link.detuning) * t;
            drv += (link.coupling + link.phonon_coupling * x)
                * Complex64::from_polar(1.0, phase)
                * values.polaritons[link.target.0];
        }

        -Complex64::i() * drv
    }

    fn phonon_acceleration(
        &self,
        index: usize,
        mode: &PhononMode,
        values: &GraphState,
        t: f64,
    ) -> f64 {
        let (x, v) = values.phonons[index];
        let omega = mode.frequency();
        let gamma = mode.damping();

        let backaction: Complex64 = mode
            .pairings()
            .iter()
            .map(|pairing| {
                let [a, b] = pairing.modes;
                pairing.coupling
                    * values.polaritons[a.0]
                    * values.polaritons[b.0].conj()
                    * Complex64::from_polar(1.0, -(omega + pairing.detuning) * t)
            })
            .sum();

        -omega * omega * x - gamma * v - 2.0 * omega * gamma * backaction.re
    }
}

impl DynamicalSystem<f64> for CavityRhs<'_> {
    fn dimension(&self) -> usize {
        self.layout.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let mut values = self.scratch.borrow_mut();
        self.layout.decode(x, &mut values);

        for (i, mode) in self.graph.polaritons().iter().enumerate() {
            let d = self.polariton_derivative(i, mode, &values, t);
            let o = self.layout.polariton_offset(i);
            out[o] = d.re;
            out[o + 1] = d.im;
        }

        for (j, mode) in self.graph.phonons().iter().enumerate() {
            let o = self.layout.phonon_offset(j);
            out[o] = values.phonons[j].1;
            out[o + 1] = self.phonon_acceleration(j, mode, &values, t);
        }

        for (k, owner) in self.layout.reservoir_owners().iter().enumerate() {
            let intensity = values.polaritons[owner.0].norm_sqr();
            let o = self.layout.reservoir_offset(k);
            out[o] = self.graph.polaritons[owner.0]
                .reservoir()
                .map_or(0.0, |r| r.rate(values.reservoirs[k], intensity));
        }
    }
}
