//! Error types for the custody daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] custody_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Seed persistence unreadable, unwritable or corrupt
    #[error("Seed storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Caller origin could not be established
    #[error("Trust establishment failed: {0}")]
    TrustEstablishmentFailed(String),

    /// The message channel closed before a reply arrived
    #[error("Channel closed")]
    ChannelClosed,

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request carried an operation tag the vault does not implement
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Request parameters could not be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Correlation id already in flight on this channel
    #[error("Duplicate callback id: {0}")]
    DuplicateCallback(String),

    /// Too many requests in flight on this channel
    #[error("Too many pending requests")]
    Busy,

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Worker task failed
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error reported by the vault to a client
    #[error("{code}: {message}")]
    Remote { code: String, message: String },
}

impl DaemonError {
    /// Stable wire code reported to callers
    pub fn code(&self) -> &str {
        match self {
            DaemonError::Core(e) => e.code(),
            DaemonError::Io(_) => "IoError",
            DaemonError::Serialization(_) => "SerializationError",
            DaemonError::StorageUnavailable(_) => "StorageUnavailable",
            DaemonError::TrustEstablishmentFailed(_) => "TrustEstablishmentFailed",
            DaemonError::ChannelClosed => "ChannelClosed",
            DaemonError::Ipc(_) => "IpcError",
            DaemonError::Config(_) => "ConfigError",
            DaemonError::UnknownOperation(_) => "UnknownOperation",
            DaemonError::InvalidRequest(_) => "InvalidRequest",
            DaemonError::DuplicateCallback(_) => "DuplicateCallback",
            DaemonError::Busy => "Busy",
            DaemonError::Timeout => "Timeout",
            DaemonError::Internal(_) => "InternalError",
            DaemonError::Remote { code, .. } => code.as_str(),
        }
    }

    /// Human-readable message without the wrapping variant prefix
    pub fn message(&self) -> String {
        match self {
            DaemonError::Core(e) => e.to_string(),
            DaemonError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_taxonomy() {
        assert_eq!(
            DaemonError::from(custody_core::Error::DecryptionFailed).code(),
            "DecryptionFailed"
        );
        assert_eq!(DaemonError::Busy.code(), "Busy");
        assert_eq!(
            DaemonError::UnknownOperation("frob".into()).code(),
            "UnknownOperation"
        );

        let remote = DaemonError::Remote {
            code: "AliasConflict".into(),
            message: "taken".into(),
        };
        assert_eq!(remote.code(), "AliasConflict");
        assert_eq!(remote.message(), "taken");
    }

    #[test]
    fn test_core_message_is_unwrapped() {
        let err = DaemonError::from(custody_core::Error::DecryptionFailed);
        assert_eq!(err.message(), "Decryption failed");
    }
}
