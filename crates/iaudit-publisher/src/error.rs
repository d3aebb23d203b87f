use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("store error: {0}")]
    Store(#[from] iaudit_store::StoreError),

    #[error("exists row {0} has no raw notification on file")]
    MissingRaw(iaudit_domain::Id),

    #[error("malformed raw envelope: {0}")]
    Envelope(String),

    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("broker connection error: {0}")]
    Pool(#[from] deadpool_lapin::PoolError),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}
