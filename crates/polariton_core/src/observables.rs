use crate::cavity::Cavity;
use crate::codec::StateLayout;
use crate::error::{CavityError, Result};

/// Running sums of the sweep observables.
///
/// Each sample contributes `|φᵢ|²` per polariton, `xⱼ²` per phonon and `nₖ` per reservoir,
/// read from a flat state in codec order. Samples are unweighted.
#[derive(Debug, Clone)]
pub struct ObservableAverager {
    layout: StateLayout,
    sums: Vec<f64>,
    samples: usize,
}

impl ObservableAverager {
    pub fn new(layout: &StateLayout) -> Self {
        let len = layout.polariton_count() + layout.phonon_count() + layout.reservoir_count();
        Self {
            layout: layout.clone(),
            sums: vec![0.0; len],
            samples: 0,
        }
    }

    pub fn for_cavity(cavity: &Cavity) -> Self {
        Self::new(cavity.layout())
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Number of averaged quantities.
    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    pub fn sample(&mut self, cavity: &Cavity) -> Result<()> {
        self.sample_state(cavity.state())
    }

    pub fn sample_state(&mut self, state: &[f64]) -> Result<()> {
        let expected = self.layout.dimension();
        if state.len() != expected {
            return Err(CavityError::DimensionMismatch {
                expected,
                found: state.len(),
            });
        }

        let (p, ph) = (self.layout.polariton_count(), self.layout.phonon_count());
        for i in 0..p {
            let o = self.layout.polariton_offset(i);
            self.sums[i] += state[o] * state[o] + state[o + 1] * state[o + 1];
        }
        for j in 0..ph {
            let x = state[self.layout.phonon_offset(j)];
            self.sums[p + j] += x * x;
        }
        for k in 0..self.layout.reservoir_count() {
            self.sums[p + ph + k] += state[self.layout.reservoir_offset(k)];
        }
        self.samples += 1;
        Ok(())
    }

    /// Means in the order polariton intensities, phonon `x²`, reservoir populations.
    /// `None` before the first sample.
    pub fn means(&self) -> Option<Vec<f64>> {
        if self.samples == 0 {
            return None;
        }
        let n = self.samples as f64;
        Some(self.sums.iter().map(|s| s / n).collect())
    }

    pub fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = 0.0);
        self.samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::ObservableAverager;
    use crate::codec::StateLayout;
    use crate::modes::{ModeGraph, PhononMode, PolaritonMode};

    fn layout() -> StateLayout {
        let mut a = PolaritonMode::new(1.0, 0.0);
        a.add_reservoir(0, 1.0, 1.0, 1.0, 1.0, 0.0).unwrap();
        let b = PolaritonMode::new(1.0, 0.0);
        StateLayout::new(&ModeGraph::new(vec![a, b], vec![PhononMode::new(20.0, 0.05)]))
    }

    #[test]
    fn averages_intensity_position_square_and_population() {
        let mut avg = ObservableAverager::new(&layout());
        assert_eq!(avg.len(), 4);
        assert!(avg.means().is_none());

        avg.sample_state(&[3.0, 4.0, 0.0, 1.0, 2.0, 9.0, 0.5]).unwrap();
        avg.sample_state(&[1.0, 0.0, 0.0, 3.0, -4.0, 9.0, 1.5]).unwrap();
        assert_eq!(avg.samples(), 2);
        assert_eq!(avg.means().unwrap(), vec![13.0, 5.0, 10.0, 1.0]);

        avg.reset();
        assert!(avg.means().is_none());
    }

    #[test]
    fn wrong_state_length_is_rejected() {
        let mut avg = ObservableAverager::new(&layout());
        assert!(avg.sample_state(&[0.0; 3]).is_err());
        assert_eq!(avg.samples(), 0);
    }
}
