use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid timestamp in field {field}: {source}")]
    InvalidTimestamp {
        field: String,
        #[source]
        source: iaudit_domain::DomainError,
    },
}
