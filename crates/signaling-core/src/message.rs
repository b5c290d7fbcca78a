//! Call-signaling message model and its JSON wire shape
//!
//! Every message travels as a JSON object multiplexed over the application's
//! real-time connection:
//!
//! ```text
//! { "type": "offer" | "answer" | "ice-candidate" | "call_end" | "call_decline" | "incoming_call",
//!   "callId": "<opaque id>",
//!   "payload": { ... } }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use rtcall_signaling_core::{CallId, SignalingMessage, SignalingPayload, EndReason};
//!
//! let msg = SignalingMessage::call_end(CallId::from("c-1"), EndReason::Hangup);
//! let text = msg.to_json().unwrap();
//! let back = SignalingMessage::from_json(&text).unwrap();
//! assert_eq!(back, msg);
//! assert!(matches!(back.payload, SignalingPayload::CallEnd { .. }));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SignalingError, SignalingResult};

/// Opaque call identifier assigned by the call-record service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    /// Create a call id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Voice-only or voice+video call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio only
    Voice,
    /// Audio and video
    Video,
}

impl MediaKind {
    /// Map the UI's "wants video" flag to a media kind
    pub fn from_wants_video(wants_video: bool) -> Self {
        if wants_video { Self::Video } else { Self::Voice }
    }

    /// Whether this kind carries a video track
    pub fn has_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

/// Offer or answer half of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial description sent by the initiator
    Offer,
    /// Description sent back by the responder
    Answer,
}

/// A session description as produced by the negotiation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate for the first media section
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

/// Who is calling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    /// Stable user id
    pub id: String,
    /// Name shown on the incoming call screen
    pub display_name: String,
    /// Avatar reference (URL or asset key)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl CallerIdentity {
    /// Create an identity with no avatar
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    /// Placeholder for a caller announced only by its offer
    pub fn unknown() -> Self {
        Self::new("unknown", "Unknown caller")
    }

    /// Attach an avatar reference
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A party hung up
    Hangup,
    /// The callee declined
    Declined,
    /// The callee is on another call
    Busy,
    /// Nobody answered before the ring timeout
    NoAnswer,
    /// The caller gave up before the callee answered
    Cancelled,
    /// Media negotiation failed
    Failed,
    /// Negotiation did not complete in time
    Timeout,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hangup => "hangup",
            Self::Declined => "declined",
            Self::Busy => "busy",
            Self::NoAnswer => "no answer",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Tag-specific body of a signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingPayload {
    /// Call invitation announcing the caller
    IncomingCall {
        caller: CallerIdentity,
        kind: MediaKind,
    },
    /// Initiator's session description
    Offer {
        description: SessionDescription,
        kind: MediaKind,
    },
    /// Responder's session description
    Answer { description: SessionDescription },
    /// Trickled connectivity candidate
    IceCandidate { candidate: IceCandidate },
    /// The sending side tore the call down
    CallEnd { reason: EndReason },
    /// The sending side refused the invitation
    CallDecline { reason: EndReason },
}

impl SignalingPayload {
    /// Wire `type` tag for this payload
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::IncomingCall { .. } => "incoming_call",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::CallEnd { .. } => "call_end",
            Self::CallDecline { .. } => "call_decline",
        }
    }
}

/// A call-signaling message: a `callId` plus a tagged payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    /// Call this message belongs to
    pub call_id: CallId,
    /// Tagged body
    pub payload: SignalingPayload,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(rename = "callId")]
    call_id: CallId,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize, Deserialize)]
struct InviteBody {
    caller: CallerIdentity,
    kind: MediaKind,
}

#[derive(Serialize, Deserialize)]
struct OfferBody {
    #[serde(flatten)]
    description: SessionDescription,
    kind: MediaKind,
}

#[derive(Serialize, Deserialize)]
struct ReasonBody {
    #[serde(default)]
    reason: Option<EndReason>,
}

fn decode<T: serde::de::DeserializeOwned>(message_type: &str, payload: Value) -> SignalingResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| SignalingError::invalid_payload(message_type, e.to_string()))
}

impl SignalingMessage {
    /// Create a message from its parts
    pub fn new(call_id: CallId, payload: SignalingPayload) -> Self {
        Self { call_id, payload }
    }

    /// Invitation announcing `caller`
    pub fn incoming_call(call_id: CallId, caller: CallerIdentity, kind: MediaKind) -> Self {
        Self::new(call_id, SignalingPayload::IncomingCall { caller, kind })
    }

    /// Offer carrying the initiator's description
    pub fn offer(call_id: CallId, description: SessionDescription, kind: MediaKind) -> Self {
        Self::new(call_id, SignalingPayload::Offer { description, kind })
    }

    /// Answer carrying the responder's description
    pub fn answer(call_id: CallId, description: SessionDescription) -> Self {
        Self::new(call_id, SignalingPayload::Answer { description })
    }

    /// Trickled ICE candidate
    pub fn ice_candidate(call_id: CallId, candidate: IceCandidate) -> Self {
        Self::new(call_id, SignalingPayload::IceCandidate { candidate })
    }

    /// Call teardown notice
    pub fn call_end(call_id: CallId, reason: EndReason) -> Self {
        Self::new(call_id, SignalingPayload::CallEnd { reason })
    }

    /// Invitation refusal
    pub fn call_decline(call_id: CallId, reason: EndReason) -> Self {
        Self::new(call_id, SignalingPayload::CallDecline { reason })
    }

    /// Wire `type` tag
    pub fn message_type(&self) -> &'static str {
        self.payload.message_type()
    }

    /// Whether `message_type` is one of the call-signaling tags
    pub fn is_signaling_type(message_type: &str) -> bool {
        matches!(
            message_type,
            "incoming_call" | "offer" | "answer" | "ice-candidate" | "call_end" | "call_decline"
        )
    }

    /// Encode into the JSON wire value
    pub fn to_value(&self) -> SignalingResult<Value> {
        let payload = match &self.payload {
            SignalingPayload::IncomingCall { caller, kind } => serde_json::to_value(InviteBody {
                caller: caller.clone(),
                kind: *kind,
            })?,
            SignalingPayload::Offer { description, kind } => serde_json::to_value(OfferBody {
                description: description.clone(),
                kind: *kind,
            })?,
            SignalingPayload::Answer { description } => serde_json::to_value(description)?,
            SignalingPayload::IceCandidate { candidate } => serde_json::to_value(candidate)?,
            SignalingPayload::CallEnd { reason } | SignalingPayload::CallDecline { reason } => {
                serde_json::to_value(ReasonBody {
                    reason: Some(*reason),
                })?
            }
        };

        Ok(serde_json::to_value(Envelope {
            message_type: self.message_type().to_string(),
            call_id: self.call_id.clone(),
            payload,
        })?)
    }

    /// Encode into a JSON text frame
    pub fn to_json(&self) -> SignalingResult<String> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }

    /// Decode a JSON wire value
    ///
    /// Returns [`SignalingError::UnsupportedType`] for frames that belong to
    /// other subsystems sharing the connection.
    pub fn from_value(value: Value) -> SignalingResult<Self> {
        let envelope: Envelope = serde_json::from_value(value)?;
        let t = envelope.message_type.as_str();

        let payload = match t {
            "incoming_call" => {
                let body: InviteBody = decode(t, envelope.payload)?;
                SignalingPayload::IncomingCall {
                    caller: body.caller,
                    kind: body.kind,
                }
            }
            "offer" => {
                let body: OfferBody = decode(t, envelope.payload)?;
                if body.description.sdp_type != SdpType::Offer {
                    return Err(SignalingError::invalid_payload(t, "description is not an offer"));
                }
                SignalingPayload::Offer {
                    description: body.description,
                    kind: body.kind,
                }
            }
            "answer" => {
                let description: SessionDescription = decode(t, envelope.payload)?;
                if description.sdp_type != SdpType::Answer {
                    return Err(SignalingError::invalid_payload(t, "description is not an answer"));
                }
                SignalingPayload::Answer { description }
            }
            "ice-candidate" => SignalingPayload::IceCandidate {
                candidate: decode(t, envelope.payload)?,
            },
            "call_end" => {
                let body: Option<ReasonBody> = decode(t, envelope.payload)?;
                SignalingPayload::CallEnd {
                    reason: body.and_then(|b| b.reason).unwrap_or(EndReason::Hangup),
                }
            }
            "call_decline" => {
                let body: Option<ReasonBody> = decode(t, envelope.payload)?;
                SignalingPayload::CallDecline {
                    reason: body.and_then(|b| b.reason).unwrap_or(EndReason::Declined),
                }
            }
            other => {
                return Err(SignalingError::UnsupportedType {
                    message_type: other.to_string(),
                });
            }
        };

        Ok(Self::new(envelope.call_id, payload))
    }

    /// Decode a JSON text frame
    pub fn from_json(text: &str) -> SignalingResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_wire_shape() {
        let msg = SignalingMessage::offer(
            CallId::from("call-7"),
            SessionDescription::offer("v=0"),
            MediaKind::Video,
        );
        let value = msg.to_value().unwrap();

        assert_eq!(value["type"], "offer");
        assert_eq!(value["callId"], "call-7");
        assert_eq!(value["payload"]["sdp"], "v=0");
        assert_eq!(value["payload"]["type"], "offer");
        assert_eq!(value["payload"]["kind"], "video");
    }

    #[test]
    fn test_ice_candidate_uses_camel_case() {
        let msg = SignalingMessage::ice_candidate(
            CallId::from("c"),
            IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host"),
        );
        let value = msg.to_value().unwrap();

        assert_eq!(value["type"], "ice-candidate");
        assert_eq!(value["payload"]["sdpMid"], "0");
        assert_eq!(value["payload"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_call_end_without_payload_defaults_to_hangup() {
        let text = json!({ "type": "call_end", "callId": "abc" }).to_string();
        let msg = SignalingMessage::from_json(&text).unwrap();

        assert_eq!(msg.call_id.as_str(), "abc");
        assert_eq!(msg.payload, SignalingPayload::CallEnd { reason: EndReason::Hangup });
    }

    #[test]
    fn test_foreign_frame_is_reported_as_unsupported() {
        let text = json!({ "type": "chat_message", "callId": "x", "payload": {"text": "hi"} }).to_string();
        let err = SignalingMessage::from_json(&text).unwrap_err();
        assert!(err.is_foreign_frame());
    }

    #[test]
    fn test_answer_with_offer_description_is_rejected() {
        let text = json!({
            "type": "answer",
            "callId": "x",
            "payload": { "type": "offer", "sdp": "v=0" }
        })
        .to_string();

        let err = SignalingMessage::from_json(&text).unwrap_err();
        assert!(matches!(err, SignalingError::InvalidPayload { .. }));
    }

    #[test]
    fn test_invite_round_trip_keeps_identity() {
        let caller = CallerIdentity::new("u1", "Alice").with_avatar("avatars/u1.png");
        let msg = SignalingMessage::incoming_call(CallId::from("c-9"), caller.clone(), MediaKind::Voice);

        let decoded = SignalingMessage::from_json(&msg.to_json().unwrap()).unwrap();
        match decoded.payload {
            SignalingPayload::IncomingCall { caller: got, kind } => {
                assert_eq!(got, caller);
                assert_eq!(kind, MediaKind::Voice);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
