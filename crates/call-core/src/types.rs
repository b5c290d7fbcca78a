//! Core data types shared across call-core
//!
//! - **States** - [`CallState`] for the manager, [`ConnectionState`] for the adapter
//! - **Session data** - [`PendingInvite`], [`CallSnapshot`]
//! - **Media handles** - [`MediaStream`], [`CameraFacing`]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use rtcall_signaling_core::{
    CallId, CallerIdentity, EndReason, IceCandidate, MediaKind, SessionDescription,
};

/// Call manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// No call
    Idle,
    /// Outgoing: offer sent, waiting for the answer
    Dialing,
    /// Incoming: invite pending local accept/decline
    Ringing,
    /// Descriptions exchanged, media negotiating
    Connecting,
    /// Media connected
    Active,
    /// Teardown in progress
    Ending,
}

impl CallState {
    /// Whether a call (or invite) is in progress
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// States in which a local stream is held
    pub fn has_local_media(&self) -> bool {
        matches!(self, Self::Dialing | Self::Connecting | Self::Active)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which side placed the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Placed by the local user
    Outgoing,
    /// Placed by the remote party
    Incoming,
}

/// Negotiation role; the initiator sends the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallRole {
    /// Sends the offer
    Initiator,
    /// Sends the answer
    Responder,
}

impl From<CallDirection> for CallRole {
    fn from(direction: CallDirection) -> Self {
        match direction {
            CallDirection::Outgoing => Self::Initiator,
            CallDirection::Incoming => Self::Responder,
        }
    }
}

/// Connection state reported by a peer connection adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Nothing negotiated yet
    New,
    /// Local description produced, waiting for connectivity
    Connecting,
    /// Media path established
    Connected,
    /// Torn down, or the path was lost
    Disconnected,
    /// Negotiation failed
    Failed,
}

impl ConnectionState {
    /// Whether the state ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Opaque stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a stream comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamOrigin {
    /// Local capture
    Local,
    /// Received from the peer
    Remote,
}

/// Handle to a media stream
///
/// The provider (local) or adapter (remote) owns the underlying resources;
/// everyone else holds a copy of this handle only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStream {
    /// Stream id
    pub id: StreamId,
    /// Local capture or remote media
    pub origin: StreamOrigin,
    /// Carries an audio track
    pub has_audio: bool,
    /// Carries a video track
    pub has_video: bool,
    /// Device or track label
    pub label: String,
}

impl MediaStream {
    /// Handle for a local capture stream
    pub fn local(has_video: bool, label: impl Into<String>) -> Self {
        Self {
            id: StreamId::new(),
            origin: StreamOrigin::Local,
            has_audio: true,
            has_video,
            label: label.into(),
        }
    }

    /// Handle for a remote stream
    pub fn remote(has_audio: bool, has_video: bool, label: impl Into<String>) -> Self {
        Self {
            id: StreamId::new(),
            origin: StreamOrigin::Remote,
            has_audio,
            has_video,
            label: label.into(),
        }
    }
}

/// Which camera is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraFacing {
    /// Selfie camera
    Front,
    /// Rear camera
    Back,
}

impl CameraFacing {
    /// The other camera
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

/// A received, not-yet-accepted incoming call
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInvite {
    /// Call id from the invite
    pub call_id: CallId,
    /// Who is calling
    pub caller: CallerIdentity,
    /// Voice or video
    pub kind: MediaKind,
    /// When the invite arrived
    pub received_at: DateTime<Utc>,
    /// The caller's offer, once it has arrived
    pub remote_offer: Option<SessionDescription>,
}

impl PendingInvite {
    /// Create an invite with no offer yet
    pub fn new(call_id: CallId, caller: CallerIdentity, kind: MediaKind) -> Self {
        Self {
            call_id,
            caller,
            kind,
            received_at: Utc::now(),
            remote_offer: None,
        }
    }
}

/// Point-in-time copy of the manager's state for synchronous accessors
#[derive(Debug, Clone, PartialEq)]
pub struct CallSnapshot {
    /// Manager state
    pub state: CallState,
    /// Current call id, if any
    pub call_id: Option<CallId>,
    /// Direction of the current call
    pub direction: Option<CallDirection>,
    /// Negotiation role of the current call
    pub role: Option<CallRole>,
    /// Voice or video
    pub kind: Option<MediaKind>,
    /// Adapter connection state
    pub connection_state: ConnectionState,
    /// Microphone muted
    pub is_muted: bool,
    /// Camera off
    pub is_video_off: bool,
    /// Seconds spent in `Active`
    pub duration_secs: u64,
    /// Remote party for incoming calls, or the dialed target
    pub remote_party: Option<CallerIdentity>,
    /// Invite received while busy
    pub waiting_invite: Option<PendingInvite>,
    /// Local capture handle
    pub local_stream: Option<MediaStream>,
    /// Remote media handle
    pub remote_stream: Option<MediaStream>,
    /// When the call entered `Connecting`
    pub started_at: Option<DateTime<Utc>>,
}

impl CallSnapshot {
    /// Snapshot of an idle manager
    pub fn idle() -> Self {
        Self {
            state: CallState::Idle,
            call_id: None,
            direction: None,
            role: None,
            kind: None,
            connection_state: ConnectionState::New,
            is_muted: false,
            is_video_off: false,
            duration_secs: 0,
            remote_party: None,
            waiting_invite: None,
            local_stream: None,
            remote_stream: None,
            started_at: None,
        }
    }

    /// Formatted duration, e.g. `02:05`
    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration_secs)
    }
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Format a call duration as `MM:SS`, or `H:MM:SS` from one hour on
///
/// ```rust
/// use rtcall_call_core::format_duration;
///
/// assert_eq!(format_duration(125), "02:05");
/// assert_eq!(format_duration(3725), "1:02:05");
/// ```
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
