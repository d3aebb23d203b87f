use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("decimal does not represent a valid instant: {0}")]
    InvalidDecimalTime(String),

    #[error("invalid exists status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },
}
