//! Planner error types.

use thiserror::Error;

pub type PlanResult<T> = Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid planner settings: {0}")]
    InvalidSettings(String),

    #[error("unreadable planner settings: {0}")]
    Toml(#[from] toml::de::Error),
}
