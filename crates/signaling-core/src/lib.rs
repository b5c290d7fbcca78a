//! # rtcall signaling core
//!
//! Typed call-signaling messages and the channel that relays them between
//! two peers over an existing real-time connection.
//!
//! - [`message`] - the [`SignalingMessage`] model and its JSON wire shape
//! - [`transport`] - the [`SignalingTransport`] seam plus an in-memory [`LoopbackTransport`]
//! - [`channel`] - [`SignalingChannel`], the pub/sub wrapper used by the call manager
//!
//! Delivery is fire-and-forget: ordering is whatever the transport
//! preserves, and a dead link only shows up later as a negotiation timeout.

pub mod channel;
pub mod error;
pub mod message;
pub mod transport;

pub use channel::{HandlerId, SignalingChannel, SignalingHandler};
pub use error::{SignalingError, SignalingResult};
pub use message::{
    CallId, CallerIdentity, EndReason, IceCandidate, MediaKind, SdpType, SessionDescription,
    SignalingMessage, SignalingPayload,
};
pub use transport::{LoopbackTransport, SignalingTransport};
