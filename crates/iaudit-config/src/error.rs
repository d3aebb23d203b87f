use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(String),

    #[error("invalid value for environment variable {var}: {message}")]
    InvalidVar { var: String, message: String },
}
