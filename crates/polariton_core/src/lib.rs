pub mod cavity;
pub mod codec;
pub mod config;
pub mod error;
pub mod modes;
pub mod observables;
pub mod output;
pub mod reservoir;
pub mod rhs;
pub mod solvers;
pub mod stability;
/// The `polariton_core` crate integrates networks of driven-dissipative polariton modes
/// coupled to classical phonons and slow population reservoirs.
///
/// Key components:
/// - **Traits**: `Scalar`, `DynamicalSystem` (ODE right-hand sides), `Steppable` and
///   `AdaptiveSteppable` (solvers).
/// - **Modes**: polariton and phonon nodes stored in index-addressed arenas, plus reservoirs
///   owned by their polariton.
/// - **Codec / RHS**: the flat state layout and the rotating-frame equations of motion.
/// - **Solvers**: RK4 for fixed steps, Tsit5 with embedded error control for adaptive ones.
/// - **Cavity**: the orchestrator that owns graph, state and time.
/// - **Config**: text format that produces a `CavityBuilder` with seeded random initial
///   conditions.
pub mod traits;

pub use cavity::{Cavity, CavityBuilder, IntegrationStats, IntegratorSettings, StepReport};
pub use config::{CavityConfig, Stepper, SweepSettings};
pub use error::{CavityError, NodeKind};
pub use modes::{PhononId, PhononMode, PolaritonId, PolaritonMode};
pub use observables::ObservableAverager;
pub use output::{write_record, TrajectoryWriter};
pub use reservoir::Reservoir;
pub use traits::Tolerances;
