use serde::Serialize;

/// Errors surfaced by the console core.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// Backend could not be reached (connect failure, timeout).
    #[error("Backend unavailable: {0}")]
    NetworkUnavailable(String),

    /// Credential missing, expired or not an administrator.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    /// Realtime push source unavailable. Non-fatal.
    #[error("Realtime updates unavailable: {0}")]
    RealtimeDegraded(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Chat error: {0}")]
    ChatError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ConsoleError {
    /// Whether the caller must force re-authentication.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ConsoleError::Unauthorized(_))
    }
}

impl Serialize for ConsoleError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
