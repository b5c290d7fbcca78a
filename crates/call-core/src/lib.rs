//! # rtcall call core
//!
//! Call session state machine and media-session orchestration for
//! peer-to-peer voice/video calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtcall_call_core::{CallConfig, CallSessionManager, MediaMode};
//! use rtcall_signaling_core::{LoopbackTransport, SignalingChannel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport, _peer) = LoopbackTransport::pair();
//!     let manager = CallSessionManager::builder()
//!         .config(CallConfig::new().with_media_mode(MediaMode::Simulated))
//!         .signaling(SignalingChannel::new(transport))
//!         .build()
//!         .await?;
//!
//!     if manager.start_call("bob", false).await {
//!         println!("dialing, state = {}", manager.state());
//!     }
//!     manager.end_call().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`manager`] - [`CallSessionManager`], an actor owning the single call session
//! - [`media`] - [`MediaCapabilityProvider`](media::MediaCapabilityProvider): local capture
//! - [`peer`] - [`PeerConnectionAdapter`](peer::PeerConnectionAdapter): offer/answer/ICE
//! - [`environment`] - one-time choice between the hardware and simulated stacks
//! - [`record`] - the call-record service seam
//! - [`events`] - presentation-layer callbacks and event streams
//!
//! ## Features
//!
//! - `device-cpal` - microphone capture through cpal
//! - `webrtc` - negotiation through webrtc-rs
//! - `hardware` - both of the above

pub mod config;
pub mod environment;
pub mod error;
pub mod events;
pub mod manager;
pub mod media;
pub mod peer;
pub mod record;
pub mod recovery;
pub mod types;

pub use config::{BusyPolicy, CallConfig, MediaMode};
pub use environment::{CapabilityReport, EnvironmentCapabilitySelector, MediaStack};
pub use error::{CallError, CallResult};
pub use events::{CallEndedInfo, CallEvent, CallEventHandler, EventStream, SubscriptionId};
pub use manager::{CallSessionManager, CallSessionManagerBuilder};
pub use media::{MediaCapabilityProvider, MediaVariant};
pub use peer::{PeerConnectionAdapter, PeerConnectionFactory, PeerEvent};
pub use record::{CallRecordService, InMemoryCallRecordService};
pub use types::{
    CallDirection, CallId, CallRole, CallSnapshot, CallState, CallerIdentity, CameraFacing,
    ConnectionState, EndReason, MediaKind, MediaStream, PendingInvite, format_duration,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
