//! Error types for the signaling layer

use thiserror::Error;

/// Result type for signaling operations
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Errors that can occur while encoding, decoding or relaying signaling messages
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The underlying connection is down
    #[error("Signaling transport unavailable: {reason}")]
    Unavailable { reason: String },

    /// A frame could not be parsed as JSON
    #[error("Malformed signaling frame: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame had a known type but an unusable payload
    #[error("Invalid {message_type} payload: {reason}")]
    InvalidPayload {
        message_type: String,
        reason: String,
    },

    /// The frame type is not a call-signaling type
    #[error("Unsupported message type: {message_type}")]
    UnsupportedType { message_type: String },
}

impl SignalingError {
    /// Create a transport-unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid payload error
    pub fn invalid_payload(message_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message_type: message_type.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error comes from a frame that is simply not ours to handle
    pub fn is_foreign_frame(&self) -> bool {
        matches!(self, Self::UnsupportedType { .. })
    }
}
