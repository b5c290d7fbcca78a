//! Failure helpers for calls into external collaborators
//!
//! Nothing in call-core retries automatically: a failed call is over and the
//! user re-initiates it. What these helpers provide is bounded waiting and
//! error context; reporting the failure is left to the caller.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{CallError, CallResult};

/// Attach context to a failing result
pub trait ErrorContext<T> {
    /// Add a static context string
    fn context(self, context: &str) -> CallResult<T>;

    /// Add a lazily built context string
    fn with_context<F>(self, f: F) -> CallResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ErrorContext<T> for CallResult<T> {
    fn context(self, context: &str) -> CallResult<T> {
        self.with_context(|| context.to_string())
    }

    fn with_context<F>(self, f: F) -> CallResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let context = f();
            match e {
                CallError::CallRecord { reason } => CallError::CallRecord {
                    reason: format!("{}: {}", context, reason),
                },
                CallError::Internal { message } => CallError::Internal {
                    message: format!("{}: {}", context, message),
                },
                // Keep the variant so callers can still branch on the taxonomy
                other => other,
            }
        })
    }
}

/// Run `future`, failing with [`CallError::Timeout`] if it takes longer than `timeout`
pub async fn with_timeout<T, F>(operation_name: &str, timeout: Duration, future: F) -> CallResult<T>
where
    F: Future<Output = CallResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(CallError::Timeout {
                operation: operation_name.to_string(),
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
