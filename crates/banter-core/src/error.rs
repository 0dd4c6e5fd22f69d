use thiserror::Error;

#[derive(Debug, Error)]
pub enum BanterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed event: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BanterError>;
