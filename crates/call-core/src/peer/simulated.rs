//! Simulated peer connection
//!
//! Produces syntactically plausible SDP, trickles a few synthetic host
//! candidates, and once both descriptions are in place reports `Connected`
//! after a configurable delay, followed by a synthetic remote stream. Used
//! on hosts without a negotiation engine and throughout the test suite.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{
    Negotiation, PeerConnectionAdapter, PeerConnectionFactory, PeerEvent, PeerEventReceiver,
    PeerSessionParams, emit,
};
use crate::config::SimulatedConfig;
use crate::error::CallResult;
use crate::media::MediaVariant;
use crate::types::{ConnectionState, IceCandidate, MediaKind, MediaStream, SessionDescription};

/// Counters shared by every adapter a factory creates
#[derive(Debug, Default)]
pub struct SimulatedPeerStats {
    adapters_created: AtomicUsize,
    candidates_received: AtomicUsize,
    candidates_applied: AtomicUsize,
    local_candidates: AtomicUsize,
}

impl SimulatedPeerStats {
    /// Adapters built so far
    pub fn adapters_created(&self) -> usize {
        self.adapters_created.load(Ordering::SeqCst)
    }

    /// Remote candidates handed to an adapter
    pub fn candidates_received(&self) -> usize {
        self.candidates_received.load(Ordering::SeqCst)
    }

    /// Remote candidates actually applied (immediately or after buffering)
    pub fn candidates_applied(&self) -> usize {
        self.candidates_applied.load(Ordering::SeqCst)
    }

    /// Local candidates emitted
    pub fn local_candidates(&self) -> usize {
        self.local_candidates.load(Ordering::SeqCst)
    }
}

/// Factory for [`SimulatedPeerAdapter`]s
#[derive(Debug)]
pub struct SimulatedPeerFactory {
    connect_delay: Duration,
    remote_stream_delay: Duration,
    local_candidates: usize,
    stats: Arc<SimulatedPeerStats>,
    fail_next: AtomicBool,
}

impl SimulatedPeerFactory {
    /// Create a factory with the given timing
    pub fn new(config: &SimulatedConfig) -> Self {
        Self {
            connect_delay: Duration::from_millis(config.connect_delay_ms),
            remote_stream_delay: Duration::from_millis(config.remote_stream_delay_ms),
            local_candidates: config.local_candidates,
            stats: Arc::new(SimulatedPeerStats::default()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<SimulatedPeerStats> {
        self.stats.clone()
    }

    /// Make the next adapter report `Failed` instead of `Connected`
    pub fn fail_next_negotiation(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl Default for SimulatedPeerFactory {
    fn default() -> Self {
        Self::new(&SimulatedConfig::default())
    }
}

#[async_trait]
impl PeerConnectionFactory for SimulatedPeerFactory {
    fn variant(&self) -> MediaVariant {
        MediaVariant::Simulated
    }

    async fn create(
        &self,
        params: PeerSessionParams,
    ) -> CallResult<(Box<dyn PeerConnectionAdapter>, PeerEventReceiver)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.stats.adapters_created.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_next.swap(false, Ordering::SeqCst);
        debug!(call_id = %params.call_id, role = ?params.role, fail, "simulated peer connection created");

        let adapter = SimulatedPeerAdapter {
            shared: Arc::new(Shared {
                negotiation: Mutex::new(Negotiation::new()),
                events: tx,
            }),
            stats: self.stats.clone(),
            params,
            connect_delay: self.connect_delay,
            remote_stream_delay: self.remote_stream_delay,
            local_candidates: self.local_candidates,
            fail,
            connect_task: Mutex::new(None),
        };
        Ok((Box::new(adapter), rx))
    }
}

struct Shared {
    negotiation: Mutex<Negotiation>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

/// Synthetic negotiation engine
pub struct SimulatedPeerAdapter {
    shared: Arc<Shared>,
    stats: Arc<SimulatedPeerStats>,
    params: PeerSessionParams,
    connect_delay: Duration,
    remote_stream_delay: Duration,
    local_candidates: usize,
    fail: bool,
    connect_task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedPeerAdapter {
    fn synthetic_sdp(&self) -> String {
        let session_id = rand::random::<u32>();
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=rtcall-simulated\r\nt=0 0\r\n\
             a=group:BUNDLE 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\na=rtpmap:111 opus/48000/2\r\n",
            session_id
        );
        if self.params.kind == MediaKind::Video {
            sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:1\r\na=rtpmap:96 VP8/90000\r\n");
        }
        sdp
    }

    fn set_local(&self, description: SessionDescription) {
        {
            let mut negotiation = self.shared.negotiation.lock();
            negotiation.local = Some(description);
            negotiation.state = ConnectionState::Connecting;
        }
        emit(&self.shared.events, PeerEvent::StateChanged(ConnectionState::Connecting));
        self.trickle_local_candidates();
        self.maybe_connect();
    }

    fn trickle_local_candidates(&self) {
        for index in 0..self.local_candidates {
            let port = 50_000 + rand::random::<u16>() % 10_000;
            let candidate = IceCandidate::new(format!(
                "candidate:{} 1 udp {} 192.0.2.{} {} typ host",
                index + 1,
                2_130_706_431u32 - index as u32,
                index + 10,
                port
            ));
            self.stats.local_candidates.fetch_add(1, Ordering::SeqCst);
            emit(&self.shared.events, PeerEvent::LocalIceCandidate(candidate));
        }
    }

    /// Start the connect timer once both descriptions are present
    fn maybe_connect(&self) {
        if !self.shared.negotiation.lock().is_complete() {
            return;
        }
        let mut task = self.connect_task.lock();
        if task.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let connect_delay = self.connect_delay;
        let remote_stream_delay = self.remote_stream_delay;
        let fail = self.fail;
        let has_video = self.params.kind.has_video();
        let call_id = self.params.call_id.clone();

        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(connect_delay).await;
            let next = if fail {
                ConnectionState::Failed
            } else {
                ConnectionState::Connected
            };
            {
                let mut negotiation = shared.negotiation.lock();
                if negotiation.state != ConnectionState::Connecting {
                    return;
                }
                negotiation.state = next;
            }
            info!(%call_id, state = ?next, "simulated peer connection settled");
            emit(&shared.events, PeerEvent::StateChanged(next));
            if fail {
                return;
            }

            tokio::time::sleep(remote_stream_delay).await;
            if shared.negotiation.lock().state != ConnectionState::Connected {
                return;
            }
            let stream = MediaStream::remote(true, has_video, "simulated-remote");
            emit(&shared.events, PeerEvent::RemoteStream(stream));
        }));
    }
}

#[async_trait]
impl PeerConnectionAdapter for SimulatedPeerAdapter {
    async fn create_offer(&self) -> CallResult<SessionDescription> {
        self.shared.negotiation.lock().check_can_offer()?;
        let offer = SessionDescription::offer(self.synthetic_sdp());
        self.set_local(offer.clone());
        Ok(offer)
    }

    async fn create_answer(&self) -> CallResult<SessionDescription> {
        self.shared.negotiation.lock().check_can_answer()?;
        let answer = SessionDescription::answer(self.synthetic_sdp());
        self.set_local(answer.clone());
        Ok(answer)
    }

    async fn apply_remote_description(&self, description: SessionDescription) -> CallResult<()> {
        let flushed = {
            let mut negotiation = self.shared.negotiation.lock();
            negotiation.check_remote(&description)?;
            negotiation.remote = Some(description);
            negotiation.candidates.drain()
        };
        if !flushed.is_empty() {
            debug!(
                call_id = %self.params.call_id,
                count = flushed.len(),
                "applying buffered remote candidates"
            );
            self.stats
                .candidates_applied
                .fetch_add(flushed.len(), Ordering::SeqCst);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> CallResult<()> {
        self.stats.candidates_received.fetch_add(1, Ordering::SeqCst);
        let mut negotiation = self.shared.negotiation.lock();
        if negotiation.remote.is_some() {
            self.stats.candidates_applied.fetch_add(1, Ordering::SeqCst);
        } else {
            negotiation.candidates.push(candidate);
        }
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.negotiation.lock().state
    }

    async fn close(&self) {
        {
            let mut negotiation = self.shared.negotiation.lock();
            if negotiation.state == ConnectionState::Disconnected {
                return;
            }
            negotiation.state = ConnectionState::Disconnected;
        }
        if let Some(task) = self.connect_task.lock().take() {
            task.abort();
        }
        debug!(call_id = %self.params.call_id, "simulated peer connection closed");
        emit(&self.shared.events, PeerEvent::StateChanged(ConnectionState::Disconnected));
    }
}

impl Drop for SimulatedPeerAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.connect_task.lock().take() {
            task.abort();
        }
    }
}
