use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Malformed event: {0}")]
    Validation(String),

    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("No LLM client configured")]
    NotConfigured,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
