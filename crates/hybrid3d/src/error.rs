//! Error types for the simulation core.

use thiserror::Error;

/// Errors that can escape the simulation core.
///
/// Solver non-convergence is deliberately *not* an error: the partial
/// pressure field is still applied and the event is reported through
/// [`SolveStats`](crate::pressure::SolveStats).
#[derive(Debug, Error)]
pub enum SimulationError {
    /// A configuration value is outside its domain. The simulation state is
    /// untouched.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A particle velocity or position became non-finite. The simulation is
    /// marked invalid; further stepping fails until [`reset`] is called.
    ///
    /// [`reset`]: crate::HybridSimulation3D::reset
    #[error("numeric blow-up: a particle state became non-finite")]
    NumericBlowup,
}

pub type Result<T> = std::result::Result<T, SimulationError>;
