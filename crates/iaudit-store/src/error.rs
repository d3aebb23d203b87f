use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("duplicate message_id: {0}")]
    DuplicateMessageId(String),

    #[error("internal store error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(String),
}
