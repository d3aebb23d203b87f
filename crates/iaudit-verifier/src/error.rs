use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("store error: {0}")]
    Store(#[from] iaudit_store::StoreError),

    #[error("domain error: {0}")]
    Domain(#[from] iaudit_domain::DomainError),
}
