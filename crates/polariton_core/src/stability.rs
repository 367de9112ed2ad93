//! Linearization of the cavity equations around the current state.
//!
//! The Jacobian is taken at the cavity's current time, so for driven or phonon-coupled
//! systems it describes the instantaneous rotating-frame flow, not a stationary fixed point.

use crate::cavity::Cavity;
use crate::error::Result;
use crate::rhs::CavityRhs;
use crate::traits::DynamicalSystem;
use nalgebra::{Complex, DMatrix};

/// Central-difference Jacobian of the RHS at `(cavity.state(), cavity.time())`.
///
/// Fails if nodes edited through the cavity's mutable accessors left the graph inconsistent.
pub fn jacobian(cavity: &Cavity) -> Result<DMatrix<f64>> {
    cavity.ensure_consistent()?;
    let dim = cavity.dimension();
    let rhs = CavityRhs::new(cavity.graph(), cavity.layout());
    let t = cavity.time();

    let mut jac = DMatrix::zeros(dim, dim);
    let mut x = cavity.state().to_vec();
    let mut f_plus = vec![0.0; dim];
    let mut f_minus = vec![0.0; dim];
    let scale = f64::EPSILON.cbrt();

    for j in 0..dim {
        let xj = x[j];
        let h = scale * xj.abs().max(1.0);

        x[j] = xj + h;
        rhs.apply(t, &x, &mut f_plus);
        x[j] = xj - h;
        rhs.apply(t, &x, &mut f_minus);
        x[j] = xj;

        for i in 0..dim {
            jac[(i, j)] = (f_plus[i] - f_minus[i]) / (2.0 * h);
        }
    }
    Ok(jac)
}

/// Eigenvalues of [`jacobian`], sorted by decreasing real part.
pub fn spectrum(cavity: &Cavity) -> Result<Vec<Complex<f64>>> {
    if cavity.dimension() == 0 {
        return Ok(Vec::new());
    }
    let mut values: Vec<Complex<f64>> = jacobian(cavity)?
        .complex_eigenvalues()
        .iter()
        .copied()
        .collect();
    values.sort_by(|a, b| b.re.total_cmp(&a.re));
    Ok(values)
}

/// Largest real part of the spectrum; positive means small perturbations grow.
/// `None` for an empty cavity.
pub fn max_growth_rate(cavity: &Cavity) -> Result<Option<f64>> {
    Ok(spectrum(cavity)?.first().map(|lambda| lambda.re))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{PhononMode, PolaritonMode};
    use num_complex::Complex64;

    #[test]
    fn decaying_mode_has_double_eigenvalue_at_minus_gamma() {
        let mode = PolaritonMode::new(0.5, 0.0).with_value(Complex64::new(0.3, 0.1));
        let cavity = Cavity::new(vec![mode], vec![], 0.0).unwrap();

        let jac = jacobian(&cavity).unwrap();
        assert!((jac[(0, 0)] + 0.5).abs() < 1e-8);
        assert!((jac[(1, 1)] + 0.5).abs() < 1e-8);
        assert!(jac[(0, 1)].abs() < 1e-8);

        for lambda in spectrum(&cavity).unwrap() {
            assert!((lambda.re + 0.5).abs() < 1e-6);
            assert!(lambda.im.abs() < 1e-6);
        }
        assert!((max_growth_rate(&cavity).unwrap().unwrap() + 0.5).abs() < 1e-6);
    }

    #[test]
    fn damped_phonon_spirals_inward() {
        let phonon = PhononMode::new(2.0, 0.1).with_state(0.2, -0.3);
        let cavity = Cavity::new(vec![], vec![phonon], 0.0).unwrap();

        let jac = jacobian(&cavity).unwrap();
        assert!((jac[(0, 1)] - 1.0).abs() < 1e-8);
        assert!((jac[(1, 0)] + 4.0).abs() < 1e-8);
        assert!((jac[(1, 1)] + 0.1).abs() < 1e-8);

        let values = spectrum(&cavity).unwrap();
        assert_eq!(values.len(), 2);
        let omega_d = (4.0f64 - 0.0025).sqrt();
        for lambda in &values {
            assert!((lambda.re + 0.05).abs() < 1e-6);
            assert!((lambda.im.abs() - omega_d).abs() < 1e-6);
        }
        assert!(max_growth_rate(&cavity).unwrap().unwrap() < 0.0);
    }

    #[test]
    fn gain_from_reservoir_is_detected() {
        let mut mode = PolaritonMode::new(1.0, 0.0);
        mode.add_reservoir(0, 1.0, 1.0, 3.0, 1.0, 3.0).unwrap();
        let cavity = Cavity::new(vec![mode], vec![], 0.0).unwrap();
        // κn − γ = 2 at φ = 0
        assert!((max_growth_rate(&cavity).unwrap().unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn empty_cavity_has_no_spectrum() {
        let cavity = Cavity::new(vec![], vec![], 0.0).unwrap();
        assert!(spectrum(&cavity).unwrap().is_empty());
        assert_eq!(max_growth_rate(&cavity), Ok(None));
    }
}
