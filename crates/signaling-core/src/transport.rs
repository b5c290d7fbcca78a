//! Transport abstraction under the signaling channel
//!
//! The real connection (the chat/notification socket) lives outside this
//! crate and owns its own reconnection logic. The channel only needs to push
//! and pull text frames through it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use crate::error::{SignalingError, SignalingResult};

/// A persistent bidirectional text-frame connection
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Write one frame
    ///
    /// Returns [`SignalingError::Unavailable`] when the connection is down.
    async fn send_text(&self, frame: String) -> SignalingResult<()>;

    /// Wait for the next inbound frame; `None` once the transport is closed for good
    async fn recv_text(&self) -> Option<String>;

    /// Whether the connection is currently up
    fn is_connected(&self) -> bool;
}

/// One end of an in-memory connected transport pair
///
/// Frames written on one end are read, in order, from the other. The
/// connectivity switch lets tests model a dropped socket: while disconnected,
/// writes fail with [`SignalingError::Unavailable`] and nothing is delivered.
pub struct LoopbackTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    connected: Arc<AtomicBool>,
    label: &'static str,
}

impl LoopbackTransport {
    /// Create two connected ends
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let a = Arc::new(Self {
            outbound: b_tx,
            inbound: Mutex::new(a_rx),
            connected: connected.clone(),
            label: "a",
        });
        let b = Arc::new(Self {
            outbound: a_tx,
            inbound: Mutex::new(b_rx),
            connected,
            label: "b",
        });
        (a, b)
    }

    /// Bring the shared link up or down
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn send_text(&self, frame: String) -> SignalingResult<()> {
        if !self.is_connected() {
            return Err(SignalingError::unavailable("loopback link is down"));
        }
        trace!(end = self.label, bytes = frame.len(), "loopback send");
        self.outbound
            .send(frame)
            .map_err(|_| SignalingError::unavailable("peer end dropped"))
    }

    async fn recv_text(&self) -> Option<String> {
        self.inbound.lock().await.recv().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
