//! webrtc-rs negotiation engine
//!
//! Wraps an `RTCPeerConnection` configured with the ICE servers from
//! [`IceConfig`] and sendrecv audio (plus video for video calls)
//! transceivers. Engine callbacks are translated into [`PeerEvent`]s.
//!
//! No local track is attached to the transceivers. Captured microphone
//! samples are not encoded or sent, so a call on this engine negotiates and
//! connects but carries only remote media.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use super::{
    Negotiation, PeerConnectionAdapter, PeerConnectionFactory, PeerEvent, PeerEventReceiver,
    PeerSessionParams, emit,
};
use crate::config::IceConfig;
use crate::error::{CallError, CallResult};
use crate::media::MediaVariant;
use crate::types::{ConnectionState, IceCandidate, MediaStream, SessionDescription};
use rtcall_signaling_core::SdpType;

fn engine_error(context: &str, e: webrtc::Error) -> CallError {
    CallError::negotiation_failed(format!("{}: {}", context, e))
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
            Some(ConnectionState::Disconnected)
        }
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_engine_description(description: &SessionDescription) -> CallResult<RTCSessionDescription> {
    let sdp = description.sdp.clone();
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
    }
    .map_err(|e| engine_error("invalid session description", e))
}

fn to_engine_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: None,
    }
}

/// Builds `RTCPeerConnection`-backed adapters
pub struct WebRtcPeerFactory {
    api: API,
    ice: IceConfig,
}

impl WebRtcPeerFactory {
    /// Create the engine API with default codecs and interceptors
    pub fn new(ice: IceConfig) -> CallResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| engine_error("failed to register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| engine_error("failed to register interceptors", e))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, ice })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice.servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    fn variant(&self) -> MediaVariant {
        MediaVariant::Hardware
    }

    async fn create(
        &self,
        params: PeerSessionParams,
    ) -> CallResult<(Box<dyn PeerConnectionAdapter>, PeerEventReceiver)> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| engine_error("failed to create peer connection", e))?,
        );

        pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .map_err(|e| engine_error("failed to add audio transceiver", e))?;
        if params.kind.has_video() {
            pc.add_transceiver_from_kind(RTPCodecType::Video, None)
                .await
                .map_err(|e| engine_error("failed to add video transceiver", e))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let negotiation = Arc::new(Mutex::new(Negotiation::new()));

        {
            let tx = tx.clone();
            let negotiation = negotiation.clone();
            let call_id = params.call_id.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                if let Some(mapped) = map_state(state) {
                    let changed = {
                        let mut n = negotiation.lock();
                        let changed = n.state != mapped;
                        n.state = mapped;
                        changed
                    };
                    if changed {
                        info!(%call_id, state = ?mapped, "peer connection state changed");
                        emit(&tx, PeerEvent::StateChanged(mapped));
                    }
                }
                Box::pin(async {})
            }));
        }

        {
            let tx = tx.clone();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => emit(
                            &tx,
                            PeerEvent::LocalIceCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_m_line_index: init.sdp_mline_index,
                            }),
                        ),
                        Err(e) => warn!("failed to serialize local candidate: {}", e),
                    }
                })
            }));
        }

        {
            let tx = tx.clone();
            let announced = Arc::new(AtomicBool::new(false));
            let has_video = params.kind.has_video();
            pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                debug!(kind = %track.kind(), "remote track received");
                if !announced.swap(true, Ordering::SeqCst) {
                    emit(
                        &tx,
                        PeerEvent::RemoteStream(MediaStream::remote(true, has_video, "webrtc-remote")),
                    );
                }
                Box::pin(async {})
            }));
        }

        debug!(call_id = %params.call_id, role = ?params.role, "webrtc peer connection created");
        let adapter = WebRtcPeerAdapter {
            pc,
            negotiation,
            events: tx,
            closed: AtomicBool::new(false),
        };
        Ok((Box::new(adapter), rx))
    }
}

/// `RTCPeerConnection` adapter
pub struct WebRtcPeerAdapter {
    pc: Arc<RTCPeerConnection>,
    negotiation: Arc<Mutex<Negotiation>>,
    events: mpsc::UnboundedSender<PeerEvent>,
    closed: AtomicBool,
}

impl WebRtcPeerAdapter {
    async fn finish_local(&self, description: RTCSessionDescription) -> CallResult<SessionDescription> {
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| engine_error("failed to set local description", e))?;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CallError::negotiation_failed("engine returned no local description"))?;

        let ours = match local.sdp_type {
            webrtc::peer_connection::sdp::sdp_type::RTCSdpType::Answer => {
                SessionDescription::answer(local.sdp)
            }
            _ => SessionDescription::offer(local.sdp),
        };
        let moved = {
            let mut n = self.negotiation.lock();
            n.local = Some(ours.clone());
            let moved = n.state == ConnectionState::New;
            if moved {
                n.state = ConnectionState::Connecting;
            }
            moved
        };
        if moved {
            emit(&self.events, PeerEvent::StateChanged(ConnectionState::Connecting));
        }
        Ok(ours)
    }
}

#[async_trait]
impl PeerConnectionAdapter for WebRtcPeerAdapter {
    async fn create_offer(&self) -> CallResult<SessionDescription> {
        self.negotiation.lock().check_can_offer()?;
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| engine_error("failed to create offer", e))?;
        self.finish_local(offer).await
    }

    async fn create_answer(&self) -> CallResult<SessionDescription> {
        self.negotiation.lock().check_can_answer()?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| engine_error("failed to create answer", e))?;
        self.finish_local(answer).await
    }

    async fn apply_remote_description(&self, description: SessionDescription) -> CallResult<()> {
        self.negotiation.lock().check_remote(&description)?;
        let engine_description = to_engine_description(&description)?;
        self.pc
            .set_remote_description(engine_description)
            .await
            .map_err(|e| engine_error("failed to set remote description", e))?;

        let flushed = {
            let mut n = self.negotiation.lock();
            n.remote = Some(description);
            n.candidates.drain()
        };
        for candidate in flushed {
            if let Err(e) = self.pc.add_ice_candidate(to_engine_candidate(candidate)).await {
                warn!("buffered remote candidate rejected: {}", e);
            }
        }
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> CallResult<()> {
        {
            let mut n = self.negotiation.lock();
            if n.remote.is_none() {
                n.candidates.push(candidate);
                return Ok(());
            }
        }
        self.pc
            .add_ice_candidate(to_engine_candidate(candidate))
            .await
            .map_err(|e| engine_error("failed to add remote candidate", e))
    }

    fn connection_state(&self) -> ConnectionState {
        self.negotiation.lock().state
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            warn!("error while closing peer connection: {}", e);
        }
        self.negotiation.lock().state = ConnectionState::Disconnected;
    }
}
