/// Slow incoherent population feeding back into one polariton's effective detuning.
///
/// A reservoir lives inside the polariton that owns it, so the owner is always the
/// enclosing mode; the cavity's state layout records which polariton that is.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservoir {
    value: f64,
    pump_power: f64,
    relaxation_rate: f64,
    saturation_coefficient: f64,
}

impl Reservoir {
    /// `tau` is the relaxation rate, `pump_power` the steady-state population without
    /// feedback, and `alpha` the saturation coefficient (it enters squared).
    pub fn new(tau: f64, pump_power: f64, alpha: f64, initial: f64) -> Self {
        Self {
            value: initial,
            pump_power,
            relaxation_rate: tau,
            saturation_coefficient: alpha,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn set_value(&mut self, n: f64) {
        self.value = n;
    }

    pub fn pump_power(&self) -> f64 {
        self.pump_power
    }

    pub fn set_power(&mut self, pump_power: f64) {
        self.pump_power = pump_power;
    }

    pub fn relaxation_rate(&self) -> f64 {
        self.relaxation_rate
    }

    pub fn saturation_coefficient(&self) -> f64 {
        self.saturation_coefficient
    }

    /// `dn/dt = τ·(P − n·(1 + α²·|φ|²))` for population `n` and owner intensity `|φ|²`.
    pub fn rate(&self, n: f64, intensity: f64) -> f64 {
        let alpha2 = self.saturation_coefficient * self.saturation_coefficient;
        self.relaxation_rate * (self.pump_power - n * (1.0 + alpha2 * intensity))
    }

    /// Rate at the stored population.
    pub fn derivative(&self, intensity: f64) -> f64 {
        self.rate(self.value, intensity)
    }

    /// Fixed point of [`Reservoir::rate`] at constant owner intensity.
    pub fn steady_state(&self, intensity: f64) -> f64 {
        let alpha2 = self.saturation_coefficient * self.saturation_coefficient;
        self.pump_power / (1.0 + alpha2 * intensity)
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.value.is_finite()
            && self.pump_power.is_finite()
            && self.relaxation_rate.is_finite()
            && self.saturation_coefficient.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::Reservoir;

    #[test]
    fn rate_vanishes_at_steady_state() {
        let reservoir = Reservoir::new(600.0, 7.0, 3.25f64.sqrt(), 0.3);
        for intensity in [0.0, 0.5, 2.0, 10.0] {
            let n = reservoir.steady_state(intensity);
            assert!(reservoir.rate(n, intensity).abs() < 1e-9);
        }
    }

    #[test]
    fn saturation_lowers_the_fixed_point() {
        let reservoir = Reservoir::new(1.0, 4.0, 2.0, 0.0);
        assert_eq!(reservoir.steady_state(0.0), 4.0);
        assert!((reservoir.steady_state(1.0) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn rate_relaxes_toward_pump_without_intensity() {
        let reservoir = Reservoir::new(2.0, 3.0, 1.0, 0.0);
        assert!(reservoir.rate(1.0, 0.0) > 0.0);
        assert!(reservoir.rate(5.0, 0.0) < 0.0);
        assert_eq!(reservoir.rate(1.0, 0.0), 4.0);
        assert_eq!(reservoir.derivative(0.0), 6.0);
    }
}
