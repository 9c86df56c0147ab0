//! Recommender error types.

use thiserror::Error;

pub type RecommendResult<T> = Result<T, RecommendError>;

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("invalid recommender config: {0}")]
    InvalidConfig(String),

    #[error("invalid container policy: {0}")]
    InvalidPolicy(String),
}
