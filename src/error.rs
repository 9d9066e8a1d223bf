//! Error types for the live audio session engine.

use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// Fatal kinds (everything except `Protocol` and `Codec`) force a full
/// teardown before the error is recorded in the session's error slot.
/// Non-fatal kinds are logged and the offending message or chunk dropped.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    // Pre-flight errors, detected before any resource is acquired
    #[error("Unsupported environment: {message}")]
    Environment { message: String },

    #[error("Invalid session configuration for {key}: {message}")]
    Configuration { key: String, message: String },

    // Device errors
    #[error("Input device access denied: {message}")]
    Permission { message: String },

    #[error("Audio device failed: {message}")]
    Device { message: String },

    // Channel errors
    #[error("Malformed message from agent: {message}")]
    Protocol { message: String },

    #[error("Channel closed: {reason}")]
    Transport { reason: String },

    // Audio payload errors
    #[error("Malformed audio payload: {message}")]
    Codec { message: String },
}

impl SessionError {
    /// Whether this error kind requires a full session teardown.
    ///
    /// Non-fatal kinds (`Protocol`, `Codec`) drop the offending input and
    /// leave the session running.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::Protocol { .. } | SessionError::Codec { .. }
        )
    }

    /// Short kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Environment { .. } => "environment",
            SessionError::Configuration { .. } => "configuration",
            SessionError::Permission { .. } => "permission",
            SessionError::Device { .. } => "device",
            SessionError::Protocol { .. } => "protocol",
            SessionError::Transport { .. } => "transport",
            SessionError::Codec { .. } => "codec",
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SessionError>;
