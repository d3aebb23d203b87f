use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("parse error: {0}")]
    Parse(#[from] iaudit_parser::ParseError),

    #[error("store error: {0}")]
    Store(#[from] iaudit_store::StoreError),

    #[error("timestamp error: {0}")]
    Time(#[from] iaudit_domain::DomainError),

    #[error("internal error: {0}")]
    Internal(String),
}
