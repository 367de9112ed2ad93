use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in the integrated systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A first-order ODE system `dx/dt = f(t, x)` over a flat real state vector.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer receiving dx/dt
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that step a system forward by a caller-chosen `dt`.
pub trait Steppable<T: Scalar> {
    /// Performs one unconditionally accepted step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// Absolute and relative error tolerances for embedded-pair stepping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    pub abs: f64,
    pub rel: f64,
}

impl Tolerances {
    pub fn new(abs: f64, rel: f64) -> Self {
        Self { abs, rel }
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::new(1e-6, 1e-6)
    }
}

/// Result of a single adaptive step attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The step was taken. `error` is the normalized error estimate (≤ 1)
    /// and `dt` the size that was actually used.
    Accepted { dt: f64, error: f64 },
    /// The step was discarded; state and time are untouched.
    Rejected { dt: f64, error: f64 },
}

/// A solver with an embedded error estimate that chooses its own step size.
pub trait AdaptiveSteppable<T: Scalar> {
    /// Attempts one step of size `*dt`.
    ///
    /// On acceptance `t` and `state` advance and `*dt` receives the proposed
    /// size of the next step. On rejection only `*dt` changes (shrinks).
    fn try_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: &mut T,
        state: &mut [T],
        dt: &mut T,
        tol: &Tolerances,
    ) -> StepOutcome;
}
