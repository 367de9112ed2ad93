use std::fmt;
use thiserror::Error;

/// Which node arena an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Polariton,
    Phonon,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Polariton => f.write_str("polariton"),
            NodeKind::Phonon => f.write_str("phonon"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CavityError {
    #[error("polariton {index} is inconsistent: {reason}")]
    InconsistentPolariton { index: usize, reason: String },

    #[error("phonon {index} is inconsistent: {reason}")]
    InconsistentPhonon { index: usize, reason: String },

    #[error("{kind} index {index} out of bounds (len {len})")]
    IndexOutOfRange {
        kind: NodeKind,
        index: usize,
        len: usize,
    },

    #[error("polariton {index} already has a reservoir attached")]
    ReservoirAlreadyAttached { index: usize },

    #[error("state dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid integrator settings: {0}")]
    InvalidSettings(String),

    #[error("state became non-finite at t = {time}")]
    NonFinite { time: f64 },

    #[error("adaptive step size {dt:e} fell below the minimum {min_step:e}")]
    StepSizeUnderflow { dt: f64, min_step: f64 },

    #[error("adaptive step rejected {attempts} times in a row (last dt = {dt:e})")]
    TooManyRejections { attempts: usize, dt: f64 },
}

pub type Result<T> = std::result::Result<T, CavityError>;
