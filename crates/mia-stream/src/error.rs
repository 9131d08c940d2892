use thiserror::Error;

/// Failures of the HTTP transport. Always terminal for a session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The byte stream broke after the response started.
    #[error("stream error: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    /// One event unit could not be parsed. Recovered by skipping the unit.
    #[error("decode error: {reason}")]
    Decode { reason: String, unit: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// API misuse, e.g. starting a session on a message that is still streaming.
    #[error("invalid state: cannot begin a session on a {found} message")]
    InvalidState { found: crate::assembler::MessageStatus },
}

impl StreamError {
    /// Short error code string for logs and UI surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::Decode { .. } => "DECODE_ERROR",
            StreamError::Transport(_) => "TRANSPORT_ERROR",
            StreamError::InvalidState { .. } => "INVALID_STATE",
        }
    }
}
