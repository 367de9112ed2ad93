use crate::traits::{AdaptiveSteppable, DynamicalSystem, Scalar, StepOutcome, Steppable, Tolerances};
use serde::{Deserialize, Serialize};

fn cst<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k: [Vec<T>; 4],
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half = cst::<T>(0.5);
        let two = cst::<T>(2.0);
        let sixth = cst::<T>(1.0 / 6.0);
        let t0 = *t;
        let [k1, k2, k3, k4] = &mut self.k;

        system.apply(t0, state, k1);

        for ((tmp, &y), &k) in self.tmp.iter_mut().zip(state.iter()).zip(k1.iter()) {
            *tmp = y + dt * half * k;
        }
        system.apply(t0 + dt * half, &self.tmp, k2);

        for ((tmp, &y), &k) in self.tmp.iter_mut().zip(state.iter()).zip(k2.iter()) {
            *tmp = y + dt * half * k;
        }
        system.apply(t0 + dt * half, &self.tmp, k3);

        for ((tmp, &y), &k) in self.tmp.iter_mut().zip(state.iter()).zip(k3.iter()) {
            *tmp = y + dt * k;
        }
        system.apply(t0 + dt, &self.tmp, k4);

        for i in 0..state.len() {
            state[i] = state[i] + dt * sixth * (k1[i] + two * k2[i] + two * k3[i] + k4[i]);
        }

        *t = t0 + dt;
    }
}

// Tsitouras 5(4) tableau. Row s of TSIT5_A holds the coefficients for stage s + 1.
const TSIT5_C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0];

const TSIT5_A: [&[f64]; 5] = [
    &[0.161],
    &[-0.008480655492356989, 0.335480655492357],
    &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
    &[
        5.325864828439257,
        -11.748883564062828,
        7.4955393428898365,
        -0.09249506636175525,
    ],
    &[
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.028269050394068383,
    ],
];

// 5th-order weights; also the FSAL row of the tableau.
const TSIT5_B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436081,
    2.324710524099774,
];

// Difference between the 5th- and embedded 4th-order weights, including the FSAL stage.
const TSIT5_BTILDE: [f64; 7] = [
    -0.00178001105222577714,
    -0.0008164344596567469,
    0.007880878010261995,
    -0.1447110071732629,
    0.5823571654525552,
    -0.45808210592918697,
    1.0 / 66.0,
];

/// Step-size control for embedded Runge-Kutta pairs.
///
/// Rejected steps shrink by `max(safety · err^(-1/(q-1)), min_factor)`, accepted steps with
/// small error grow by `safety · err^(-1/p)` up to `max_factor`, where `p = 5` is the order of
/// the propagated solution and `q = 4` the order of the embedded one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepController {
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
    /// Upper bound on proposed sizes; `None` leaves growth unbounded.
    pub max_step: Option<f64>,
}

impl Default for StepController {
    fn default() -> Self {
        Self {
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 5.0,
            max_step: None,
        }
    }
}

impl StepController {
    const STEPPER_ORDER: f64 = 5.0;
    const ERROR_ORDER: f64 = 4.0;

    /// Next step size after a rejection with normalized error `error` (> 1 or NaN).
    pub fn shrink(&self, dt: f64, error: f64) -> f64 {
        let factor = self.safety * error.powf(-1.0 / (Self::ERROR_ORDER - 1.0));
        dt * factor.max(self.min_factor).min(1.0)
    }

    /// Next step size after an accepted step with normalized error `error` (≤ 1).
    pub fn grow(&self, dt: f64, error: f64) -> f64 {
        let next = if error < 0.5 {
            let floor = self.max_factor.powf(-Self::STEPPER_ORDER);
            dt * self.safety * error.max(floor).powf(-1.0 / Self::STEPPER_ORDER)
        } else {
            dt
        };
        match self.max_step {
            Some(cap) => next.min(cap),
            None => next,
        }
    }
}

/// Tsitouras 5/4 Solver
///
/// `step` advances with the 5th-order solution at a fixed size. `try_step` also evaluates the
/// first-same-as-last stage to form the embedded error estimate and decides acceptance.
pub struct Tsit5<T: Scalar> {
    k: [Vec<T>; 7],
    tmp: Vec<T>,
    y_new: Vec<T>,
    a: Vec<Vec<T>>,
    b: [T; 6],
    btilde: [T; 7],
    c: [T; 6],
    pub controller: StepController,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
            y_new: vec![z; dim],
            a: TSIT5_A
                .iter()
                .map(|row| row.iter().map(|&v| cst(v)).collect())
                .collect(),
            b: TSIT5_B.map(cst::<T>),
            btilde: TSIT5_BTILDE.map(cst::<T>),
            c: TSIT5_C.map(cst::<T>),
            controller: StepController::default(),
        }
    }

    pub fn with_controller(mut self, controller: StepController) -> Self {
        self.controller = controller;
        self
    }

    /// Evaluates stages k1..k6 at (t0, state) and writes the 5th-order solution to `y_new`.
    fn stages(&mut self, system: &impl DynamicalSystem<T>, t0: T, state: &[T], dt: T) {
        system.apply(t0, state, &mut self.k[0]);

        for s in 1..6 {
            let row = &self.a[s - 1];
            for i in 0..state.len() {
                let mut acc = T::zero();
                for (j, &a) in row.iter().enumerate() {
                    acc = acc + a * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t0 + self.c[s] * dt, &self.tmp, &mut self.k[s]);
        }

        for i in 0..state.len() {
            let mut acc = T::zero();
            for (j, &b) in self.b.iter().enumerate() {
                acc = acc + b * self.k[j][i];
            }
            self.y_new[i] = state[i] + dt * acc;
        }
    }

    /// Max-norm of the embedded error, scaled component-wise by `abs + rel · max(|y|, |y'|)`.
    fn error_norm(&self, state: &[T], dt: T, tol: &Tolerances) -> f64 {
        let atol = cst::<T>(tol.abs);
        let rtol = cst::<T>(tol.rel);
        let mut norm = T::zero();
        for i in 0..state.len() {
            let mut err = T::zero();
            for (j, &bt) in self.btilde.iter().enumerate() {
                err = err + bt * self.k[j][i];
            }
            let scale = atol + rtol * state[i].abs().max(self.y_new[i].abs());
            let ratio = (dt * err).abs() / scale;
            if ratio.is_nan() {
                return f64::NAN;
            }
            norm = norm.max(ratio);
        }
        norm.to_f64().unwrap_or(f64::NAN)
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        self.stages(system, t0, state, dt);
        state.copy_from_slice(&self.y_new);
        *t = t0 + dt;
    }
}

impl<T: Scalar> AdaptiveSteppable<T> for Tsit5<T> {
    fn try_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: &mut T,
        state: &mut [T],
        dt: &mut T,
        tol: &Tolerances,
    ) -> StepOutcome {
        let t0 = *t;
        let h = *dt;
        self.stages(system, t0, state, h);
        system.apply(t0 + h, &self.y_new, &mut self.k[6]);

        let error = self.error_norm(state, h, tol);
        let h64 = h.to_f64().unwrap_or(f64::NAN);

        // NaN never compares as accepted.
        if error <= 1.0 {
            state.copy_from_slice(&self.y_new);
            *t = t0 + h;
            *dt = cst(self.controller.grow(h64, error));
            StepOutcome::Accepted { dt: h64, error }
        } else {
            *dt = cst(self.controller.shrink(h64, error));
            StepOutcome::Rejected { dt: h64, error }
        }
    }
}
