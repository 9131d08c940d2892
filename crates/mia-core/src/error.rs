use thiserror::Error;

#[derive(Debug, Error)]
pub enum MiaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MiaError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            MiaError::Config(_) => "CONFIG_ERROR",
            MiaError::Serialization(_) => "SERIALIZATION_ERROR",
            MiaError::Io(_) => "IO_ERROR",
            MiaError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MiaError>;
