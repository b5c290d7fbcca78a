//! Peer connection adapters
//!
//! A [`PeerConnectionAdapter`] owns one negotiation engine instance for one
//! call. It produces and consumes session descriptions and ICE candidates;
//! everything that happens asynchronously on the engine side (connection
//! state changes, gathered local candidates, remote media) is reported as a
//! [`PeerEvent`] on the channel handed out by the [`PeerConnectionFactory`].
//!
//! Connection states move `New -> Connecting -> Connected`, may fall to
//! `Failed` from `New` or `Connecting`, and end in `Disconnected` on close.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CallError, CallResult};
use crate::media::MediaVariant;
use crate::types::{
    CallId, CallRole, ConnectionState, IceCandidate, MediaKind, MediaStream, SessionDescription,
};
use rtcall_signaling_core::SdpType;

pub mod ice_buffer;
pub mod simulated;

#[cfg(feature = "webrtc")]
pub mod webrtc_impl;

pub use ice_buffer::IceCandidateBuffer;
pub use simulated::{SimulatedPeerFactory, SimulatedPeerStats};

#[cfg(feature = "webrtc")]
pub use webrtc_impl::WebRtcPeerFactory;

/// Asynchronous notifications from an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The connection moved to a new state
    StateChanged(ConnectionState),
    /// A local ICE candidate was gathered and should be relayed
    LocalIceCandidate(IceCandidate),
    /// Remote media arrived
    RemoteStream(MediaStream),
}

/// Receiving side of an adapter's event channel
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// What a factory needs to know to build an adapter
#[derive(Debug, Clone)]
pub struct PeerSessionParams {
    /// Call the adapter belongs to
    pub call_id: CallId,
    /// Voice or video
    pub kind: MediaKind,
    /// Whether this side offers or answers
    pub role: CallRole,
}

/// One negotiation engine instance
#[async_trait]
pub trait PeerConnectionAdapter: Send + Sync {
    /// Produce the local offer; only valid from `New`
    async fn create_offer(&self) -> CallResult<SessionDescription>;

    /// Produce the local answer; only valid from `New` after a remote offer
    async fn create_answer(&self) -> CallResult<SessionDescription>;

    /// Apply the peer's offer or answer and flush buffered candidates
    async fn apply_remote_description(&self, description: SessionDescription) -> CallResult<()>;

    /// Apply a remote candidate, or buffer it until a remote description exists
    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> CallResult<()>;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Tear the connection down; idempotent
    async fn close(&self);
}

/// Builds one adapter per call
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Which implementation this is
    fn variant(&self) -> MediaVariant;

    /// Create an adapter and its event channel
    async fn create(
        &self,
        params: PeerSessionParams,
    ) -> CallResult<(Box<dyn PeerConnectionAdapter>, PeerEventReceiver)>;
}

/// Description bookkeeping shared by the adapter implementations
#[derive(Debug)]
pub(crate) struct Negotiation {
    pub state: ConnectionState,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub candidates: IceCandidateBuffer,
}

impl Negotiation {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::New,
            local: None,
            remote: None,
            candidates: IceCandidateBuffer::new(),
        }
    }

    pub fn check_can_offer(&self) -> CallResult<()> {
        if self.state != ConnectionState::New || self.local.is_some() {
            return Err(CallError::negotiation_failed(format!(
                "cannot create offer in state {:?}",
                self.state
            )));
        }
        if self.remote.is_some() {
            return Err(CallError::negotiation_failed(
                "cannot create offer after a remote offer was applied",
            ));
        }
        Ok(())
    }

    pub fn check_can_answer(&self) -> CallResult<()> {
        if self.state != ConnectionState::New || self.local.is_some() {
            return Err(CallError::negotiation_failed(format!(
                "cannot create answer in state {:?}",
                self.state
            )));
        }
        match &self.remote {
            Some(remote) if remote.sdp_type == SdpType::Offer => Ok(()),
            _ => Err(CallError::negotiation_failed(
                "cannot create answer without a remote offer",
            )),
        }
    }

    pub fn check_remote(&self, description: &SessionDescription) -> CallResult<()> {
        if self.state.is_terminal() {
            return Err(CallError::negotiation_failed(format!(
                "connection is {:?}",
                self.state
            )));
        }
        if self.remote.is_some() {
            return Err(CallError::negotiation_failed("remote description already applied"));
        }
        if description.sdp.trim().is_empty() {
            return Err(CallError::negotiation_failed("remote description is empty"));
        }
        let expected = match &self.local {
            Some(local) if local.sdp_type == SdpType::Offer => SdpType::Answer,
            Some(_) => {
                return Err(CallError::negotiation_failed(
                    "answer already sent; no further remote description expected",
                ));
            }
            None => SdpType::Offer,
        };
        if description.sdp_type != expected {
            return Err(CallError::negotiation_failed(format!(
                "expected remote {:?}, got {:?}",
                expected, description.sdp_type
            )));
        }
        Ok(())
    }

    /// Both sides of the exchange are in place
    pub fn is_complete(&self) -> bool {
        self.local.is_some() && self.remote.is_some()
    }
}

/// Send an event, ignoring a dropped receiver
pub(crate) fn emit(tx: &mpsc::UnboundedSender<PeerEvent>, event: PeerEvent) {
    if tx.send(event).is_err() {
        debug!("peer event receiver dropped");
    }
}
