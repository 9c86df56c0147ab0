//! Error types for policy validation.

use thiserror::Error;

/// Result type alias for spec validation.
pub type SpecResult<T> = Result<T, SpecError>;

/// Errors raised when a declarative scaling spec is attached.
///
/// Validation is fail-fast: a spec that produces one of these never
/// reaches a control loop.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("invalid target spec: {0}")]
    InvalidTarget(String),

    #[error("invalid metric spec: {0}")]
    InvalidMetric(String),

    #[error("invalid scaling behavior: {0}")]
    InvalidBehavior(String),
}
