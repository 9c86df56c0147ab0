//! Error types for the scaling engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised when configuring the engine or attaching targets.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine settings: {0}")]
    InvalidSettings(String),

    #[error("spec error: {0}")]
    Spec(#[from] setpoint_core::SpecError),
}
