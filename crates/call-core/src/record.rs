//! Call-record service seam
//!
//! The backend keeps a record of every call (creation, acceptance, end). Its
//! REST transport lives outside this crate; the manager talks to it through
//! [`CallRecordService`] at the corresponding state transitions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CallError, CallResult};
use crate::types::{CallId, MediaKind};

/// Remote call-record operations
#[async_trait]
pub trait CallRecordService: Send + Sync {
    /// Create a call record and return its id
    async fn create_call(&self, target_id: &str, kind: MediaKind) -> CallResult<CallId>;

    /// Mark a call as accepted
    async fn accept_call(&self, call_id: &CallId) -> CallResult<()>;

    /// Mark a call as ended
    async fn end_call(&self, call_id: &CallId) -> CallResult<()>;
}

/// Lifecycle status of an in-memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Created, not yet accepted
    Created,
    /// Accepted by the callee
    Accepted,
    /// Ended
    Ended,
}

/// One in-memory call record
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Record id
    pub call_id: CallId,
    /// Dialed user
    pub target_id: String,
    /// Voice or video
    pub kind: MediaKind,
    /// Current status
    pub status: RecordStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Process-local call-record service
///
/// Generates UUID call ids. Used by the simulated stack, the demo and tests;
/// `fail_creation` lets tests exercise the setup-failure path.
#[derive(Debug, Default)]
pub struct InMemoryCallRecordService {
    records: Mutex<HashMap<CallId, CallRecord>>,
    fail_creation: Mutex<Option<String>>,
}

impl InMemoryCallRecordService {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_call` fail with `reason`; `None` clears it
    pub fn set_creation_failure(&self, reason: Option<String>) {
        *self.fail_creation.lock() = reason;
    }

    /// Look up a record
    pub fn record(&self, call_id: &CallId) -> Option<CallRecord> {
        self.records.lock().get(call_id).cloned()
    }

    /// Number of records created
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no record exists
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn set_status(&self, call_id: &CallId, status: RecordStatus) {
        // Records created by the remote side's service are unknown here; that is fine.
        if let Some(record) = self.records.lock().get_mut(call_id) {
            record.status = status;
        }
    }
}

#[async_trait]
impl CallRecordService for InMemoryCallRecordService {
    async fn create_call(&self, target_id: &str, kind: MediaKind) -> CallResult<CallId> {
        if let Some(reason) = self.fail_creation.lock().clone() {
            return Err(CallError::call_record(reason));
        }
        if target_id.is_empty() {
            return Err(CallError::call_record("target id must not be empty"));
        }

        let call_id = CallId::new(Uuid::new_v4().to_string());
        self.records.lock().insert(
            call_id.clone(),
            CallRecord {
                call_id: call_id.clone(),
                target_id: target_id.to_string(),
                kind,
                status: RecordStatus::Created,
                created_at: Utc::now(),
            },
        );
        debug!(%call_id, target_id, "call record created");
        Ok(call_id)
    }

    async fn accept_call(&self, call_id: &CallId) -> CallResult<()> {
        self.set_status(call_id, RecordStatus::Accepted);
        Ok(())
    }

    async fn end_call(&self, call_id: &CallId) -> CallResult<()> {
        self.set_status(call_id, RecordStatus::Ended);
        Ok(())
    }
}
