//! Typed pub/sub channel over a [`SignalingTransport`]
//!
//! The channel owns one pump task that reads frames off the transport,
//! decodes the ones that are call-signaling messages and hands them to every
//! registered handler, in arrival order. Outbound sends are fire-and-forget:
//! a dead transport is logged, never reported to the sender.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rtcall_signaling_core::{LoopbackTransport, SignalingChannel, SignalingMessage, CallId, EndReason};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (a, b) = LoopbackTransport::pair();
//! let alice = SignalingChannel::new(a);
//! let bob = SignalingChannel::new(b);
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let id = bob.on_message(move |msg: SignalingMessage| {
//!     let _ = tx.send(msg);
//! });
//! bob.start();
//!
//! alice.send(SignalingMessage::call_end(CallId::from("c1"), EndReason::Hangup)).await;
//! assert_eq!(rx.recv().await.unwrap().call_id.as_str(), "c1");
//! assert!(bob.remove_handler(id));
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{SignalingError, SignalingResult};
use crate::message::SignalingMessage;
use crate::transport::SignalingTransport;

/// Receives decoded inbound messages
///
/// Called on the channel's pump task; implementations must not block.
pub trait SignalingHandler: Send + Sync {
    /// Handle one inbound message
    fn on_message(&self, message: SignalingMessage);
}

impl<F> SignalingHandler for F
where
    F: Fn(SignalingMessage) + Send + Sync,
{
    fn on_message(&self, message: SignalingMessage) {
        self(message)
    }
}

/// Registration token returned by [`SignalingChannel::on_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

type HandlerList = Arc<RwLock<Vec<(HandlerId, Arc<dyn SignalingHandler>)>>>;

/// Typed call-signaling channel
pub struct SignalingChannel {
    transport: Arc<dyn SignalingTransport>,
    handlers: HandlerList,
    next_handler_id: AtomicU64,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Wrap a transport; call [`start`](Self::start) to begin receiving
    pub fn new(transport: Arc<dyn SignalingTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            handlers: Arc::new(RwLock::new(Vec::new())),
            next_handler_id: AtomicU64::new(1),
            pump: Mutex::new(None),
        })
    }

    /// Register an inbound message handler
    pub fn on_message<H>(&self, handler: H) -> HandlerId
    where
        H: SignalingHandler + 'static,
    {
        self.add_handler(Arc::new(handler))
    }

    /// Register an already shared handler
    pub fn add_handler(&self, handler: Arc<dyn SignalingHandler>) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        debug!(%id, "signaling handler registered");
        id
    }

    /// Unregister a handler; returns false if it was not registered
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.iter().position(|(hid, _)| *hid == id) {
            Some(pos) => {
                handlers.remove(pos);
                debug!(%id, "signaling handler removed");
                true
            }
            None => false,
        }
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether the transport currently reports a live connection
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Start the inbound pump; calling it again is a no-op
    pub fn start(&self) {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return;
        }

        let transport = self.transport.clone();
        let handlers = self.handlers.clone();
        *pump = Some(tokio::spawn(async move {
            while let Some(frame) = transport.recv_text().await {
                Self::dispatch(&handlers, &frame);
            }
            debug!("signaling transport closed, pump exiting");
        }));
    }

    /// Stop the inbound pump
    pub fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }

    fn dispatch(handlers: &HandlerList, frame: &str) {
        let message = match SignalingMessage::from_json(frame) {
            Ok(message) => message,
            Err(e) if e.is_foreign_frame() => {
                trace!(error = %e, "ignoring non-call frame");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed signaling frame");
                return;
            }
        };

        debug!(
            call_id = %message.call_id,
            message_type = message.message_type(),
            "signaling message received"
        );

        let snapshot: Vec<Arc<dyn SignalingHandler>> =
            handlers.read().iter().map(|(_, h)| h.clone()).collect();
        for handler in snapshot {
            handler.on_message(message.clone());
        }
    }

    /// Send a message, reporting transport failures to the caller
    pub async fn try_send(&self, message: &SignalingMessage) -> SignalingResult<()> {
        let frame = message.to_json()?;
        if !self.transport.is_connected() {
            return Err(SignalingError::unavailable("transport disconnected"));
        }
        self.transport.send_text(frame).await
    }

    /// Fire-and-forget send
    ///
    /// Failures are logged and swallowed; the transport's own reconnection
    /// logic is responsible for recovering the link.
    pub async fn send(&self, message: SignalingMessage) {
        match self.try_send(&message).await {
            Ok(()) => debug!(
                call_id = %message.call_id,
                message_type = message.message_type(),
                "signaling message sent"
            ),
            Err(e) => warn!(
                call_id = %message.call_id,
                message_type = message.message_type(),
                error = %e,
                "signaling send failed"
            ),
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}
