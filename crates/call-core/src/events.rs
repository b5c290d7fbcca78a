//! Event system for the presentation layer
//!
//! The manager reports everything the UI needs through [`CallEvent`]s. They
//! can be consumed two ways:
//!
//! - **Handlers** - implement [`CallEventHandler`] and register it with
//!   [`CallSessionManager::add_event_handler`](crate::CallSessionManager::add_event_handler);
//!   keep the returned [`SubscriptionId`] to unsubscribe.
//! - **Streams** - [`CallSessionManager::subscribe_events`](crate::CallSessionManager::subscribe_events)
//!   returns an [`EventStream`] over a broadcast channel.
//!
//! Events are delivered on a dedicated dispatcher task, one at a time and in
//! emission order, so a handler may call back into the manager.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use rtcall_call_core::events::{CallEndedInfo, CallEventHandler};
//! use rtcall_call_core::{CallId, MediaStream};
//!
//! struct Screen;
//!
//! #[async_trait]
//! impl CallEventHandler for Screen {
//!     async fn on_call_started(&self, call_id: CallId) {
//!         println!("call {} started", call_id);
//!     }
//!     async fn on_call_ended(&self, info: CallEndedInfo) {
//!         println!("call ended: {}", info.reason);
//!     }
//!     async fn on_remote_stream_received(&self, stream: MediaStream) {
//!         println!("remote stream {}", stream.id);
//!     }
//!     async fn on_error(&self, message: String) {
//!         eprintln!("call error: {}", message);
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;
use uuid::Uuid;

use crate::types::{CallId, CallState, EndReason, MediaStream, PendingInvite};

/// Details of a finished call
#[derive(Debug, Clone, PartialEq)]
pub struct CallEndedInfo {
    /// Call that ended, if one had an id
    pub call_id: Option<CallId>,
    /// Why it ended
    pub reason: EndReason,
    /// Seconds spent in `Active`
    pub duration_secs: u64,
    /// Whether the remote side ended it
    pub remote: bool,
}

/// Everything the manager reports to the presentation layer
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// An invite arrived while idle; the manager is now `Ringing`
    IncomingCall { invite: PendingInvite },
    /// An invite arrived while busy and was kept as a waiting call
    CallWaiting { invite: PendingInvite },
    /// A waiting invite went away (caller cancelled, dismissed, or promoted)
    CallWaitingCleared { call_id: CallId },
    /// An outgoing call was placed or an incoming call accepted
    CallStarted { call_id: CallId },
    /// Manager state changed
    StateChanged {
        previous: CallState,
        current: CallState,
    },
    /// Remote media is available
    RemoteStreamReceived { stream: MediaStream },
    /// One second of `Active` time elapsed
    DurationTick { duration_secs: u64 },
    /// The call or invite is over and all resources are released
    CallEnded { info: CallEndedInfo },
    /// A failure the user should see
    Error { message: String },
}

impl CallEvent {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::IncomingCall { .. } => "incoming_call",
            Self::CallWaiting { .. } => "call_waiting",
            Self::CallWaitingCleared { .. } => "call_waiting_cleared",
            Self::CallStarted { .. } => "call_started",
            Self::StateChanged { .. } => "state_changed",
            Self::RemoteStreamReceived { .. } => "remote_stream_received",
            Self::DurationTick { .. } => "duration_tick",
            Self::CallEnded { .. } => "call_ended",
            Self::Error { .. } => "error",
        }
    }
}

/// Callback interface for the presentation layer
///
/// The four required methods are the core contract; the rest default to
/// doing nothing.
#[async_trait]
pub trait CallEventHandler: Send + Sync {
    /// A call was placed (outgoing) or accepted (incoming)
    async fn on_call_started(&self, call_id: CallId);

    /// The call is over; the call screen should close
    async fn on_call_ended(&self, info: CallEndedInfo);

    /// Remote media can be rendered
    async fn on_remote_stream_received(&self, stream: MediaStream);

    /// A user-visible failure occurred
    async fn on_error(&self, message: String);

    /// An incoming call is ringing
    async fn on_incoming_call(&self, _invite: PendingInvite) {}

    /// Someone called while busy
    async fn on_call_waiting(&self, _invite: PendingInvite) {}

    /// Manager state changed
    async fn on_state_changed(&self, _previous: CallState, _current: CallState) {}

    /// Call duration advanced
    async fn on_duration_tick(&self, _duration_secs: u64) {}

    /// Route an event to the matching method
    async fn on_call_event(&self, event: CallEvent) {
        match event {
            CallEvent::IncomingCall { invite } => self.on_incoming_call(invite).await,
            CallEvent::CallWaiting { invite } => self.on_call_waiting(invite).await,
            CallEvent::CallWaitingCleared { .. } => {}
            CallEvent::CallStarted { call_id } => self.on_call_started(call_id).await,
            CallEvent::StateChanged { previous, current } => {
                self.on_state_changed(previous, current).await
            }
            CallEvent::RemoteStreamReceived { stream } => {
                self.on_remote_stream_received(stream).await
            }
            CallEvent::DurationTick { duration_secs } => self.on_duration_tick(duration_secs).await,
            CallEvent::CallEnded { info } => self.on_call_ended(info).await,
            CallEvent::Error { message } => self.on_error(message).await,
        }
    }
}

/// Handle returned when a handler is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered handler
#[derive(Clone)]
pub struct EventSubscription {
    id: SubscriptionId,
    handler: Arc<dyn CallEventHandler>,
}

impl EventSubscription {
    /// Wrap a handler with a fresh id
    pub fn new(handler: Arc<dyn CallEventHandler>) -> Self {
        Self {
            id: SubscriptionId(Uuid::new_v4()),
            handler,
        }
    }

    /// Subscription id
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Deliver one event
    pub async fn deliver_event(&self, event: CallEvent) {
        self.handler.on_call_event(event).await;
    }
}

/// Fan-out of events to registered handlers and broadcast subscribers
pub struct EventEmitter {
    subscriptions: RwLock<Vec<EventSubscription>>,
    broadcast_tx: broadcast::Sender<CallEvent>,
}

impl EventEmitter {
    /// Create an emitter whose broadcast channel holds `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            subscriptions: RwLock::new(Vec::new()),
            broadcast_tx,
        }
    }

    /// Register a handler
    pub fn subscribe(&self, subscription: EventSubscription) -> SubscriptionId {
        let id = subscription.id();
        self.subscriptions.write().push(subscription);
        id
    }

    /// Remove a handler; returns false if it was not registered
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        if let Some(pos) = subscriptions.iter().position(|s| s.id() == subscription_id) {
            subscriptions.remove(pos);
            true
        } else {
            false
        }
    }

    /// Number of registered handlers
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Open a broadcast stream of future events
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.broadcast_tx.subscribe())
    }

    /// Deliver an event to every handler in registration order, then to streams
    pub async fn emit(&self, event: CallEvent) {
        trace!(event = event.name(), "dispatching call event");
        let subscriptions = self.subscriptions.read().clone();
        for subscription in subscriptions {
            subscription.deliver_event(event.clone()).await;
        }
        // No stream subscribers is not an error
        let _ = self.broadcast_tx.send(event);
    }
}

/// Stream of [`CallEvent`]s
///
/// Wraps a broadcast receiver; a slow reader that falls more than the
/// channel capacity behind skips the missed events.
pub struct EventStream {
    inner: BroadcastStream<CallEvent>,
}

impl EventStream {
    fn new(rx: broadcast::Receiver<CallEvent>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }
}

impl Stream for EventStream {
    type Item = CallEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            match std::pin::Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(lagged))) => {
                    tracing::warn!(error = %lagged, "event stream lagged");
                    continue;
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl CallEventHandler for Recorder {
        async fn on_call_started(&self, _call_id: CallId) {
            self.seen.lock().push("started");
        }
        async fn on_call_ended(&self, _info: CallEndedInfo) {
            self.seen.lock().push("ended");
        }
        async fn on_remote_stream_received(&self, _stream: MediaStream) {
            self.seen.lock().push("remote_stream");
        }
        async fn on_error(&self, _message: String) {
            self.seen.lock().push("error");
        }
    }

    fn ended() -> CallEvent {
        CallEvent::CallEnded {
            info: CallEndedInfo {
                call_id: None,
                reason: EndReason::Hangup,
                duration_secs: 0,
                remote: false,
            },
        }
    }

    #[tokio::test]
    async fn test_handler_receives_in_order_and_unsubscribes() {
        let emitter = EventEmitter::new(8);
        let recorder = Arc::new(Recorder::default());
        let id = emitter.subscribe(EventSubscription::new(recorder.clone()));

        emitter.emit(CallEvent::CallStarted { call_id: CallId::from("c") }).await;
        emitter.emit(CallEvent::DurationTick { duration_secs: 1 }).await;
        emitter.emit(ended()).await;
        assert_eq!(*recorder.seen.lock(), vec!["started", "ended"]);

        assert!(emitter.unsubscribe(id));
        assert!(!emitter.unsubscribe(id));
        emitter.emit(CallEvent::Error { message: "x".into() }).await;
        assert_eq!(recorder.seen.lock().len(), 2);
        assert_eq!(emitter.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_sees_events_after_subscribing() {
        let emitter = EventEmitter::new(8);
        emitter.emit(CallEvent::Error { message: "before".into() }).await;

        let mut stream = emitter.stream();
        emitter.emit(ended()).await;

        match stream.next().await {
            Some(CallEvent::CallEnded { info }) => assert_eq!(info.reason, EndReason::Hangup),
            other => panic!("unexpected {:?}", other),
        }
    }
}
