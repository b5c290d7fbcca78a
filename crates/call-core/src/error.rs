//! Error types for call-core

use thiserror::Error;

use crate::types::CallState;

/// Result type for call-core operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors that can occur while setting up, running or tearing down a call
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// No usable camera/microphone (missing device, permission denied, sandboxed host)
    #[error("Media capability unavailable: {reason}")]
    CapabilityUnavailable { reason: String },

    /// The negotiation engine reported a failure
    #[error("Media negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    /// An operation was attempted outside the states it is valid in
    #[error("Invalid state transition: cannot {operation} while {state:?}")]
    InvalidStateTransition {
        operation: &'static str,
        state: CallState,
    },

    /// The signaling transport is down
    #[error("Signaling unavailable: {reason}")]
    SignalingUnavailable { reason: String },

    /// The call-record service rejected or failed a request
    #[error("Call record service error: {reason}")]
    CallRecord { reason: String },

    /// An operation did not complete in time
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The session manager is no longer running
    #[error("Call manager is shut down")]
    ManagerShutdown,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CallError {
    /// Create a capability-unavailable error
    pub fn capability_unavailable(reason: impl Into<String>) -> Self {
        Self::CapabilityUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a negotiation failure
    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::NegotiationFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(operation: &'static str, state: CallState) -> Self {
        Self::InvalidStateTransition { operation, state }
    }

    /// Create a call-record error
    pub fn call_record(reason: impl Into<String>) -> Self {
        Self::CallRecord {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short category name for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::CapabilityUnavailable { .. } => "capability",
            Self::NegotiationFailed { .. } => "negotiation",
            Self::InvalidStateTransition { .. } => "state",
            Self::SignalingUnavailable { .. } => "signaling",
            Self::CallRecord { .. } => "call_record",
            Self::Timeout { .. } => "timeout",
            Self::Configuration { .. } => "configuration",
            Self::ManagerShutdown => "shutdown",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether the user can reasonably try again
    ///
    /// Nothing is retried automatically; this only drives the wording the UI
    /// shows next to the error indicator.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NegotiationFailed { .. }
                | Self::SignalingUnavailable { .. }
                | Self::CallRecord { .. }
                | Self::Timeout { .. }
        )
    }
}

impl From<rtcall_signaling_core::SignalingError> for CallError {
    fn from(e: rtcall_signaling_core::SignalingError) -> Self {
        Self::SignalingUnavailable {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message_names_state() {
        let err = CallError::invalid_transition("accept", CallState::Idle);
        assert_eq!(err.to_string(), "Invalid state transition: cannot accept while Idle");
        assert_eq!(err.category(), "state");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_negotiation_failure_is_recoverable_by_user() {
        assert!(CallError::negotiation_failed("ice failed").is_recoverable());
        assert!(!CallError::capability_unavailable("no mic").is_recoverable());
    }
}
