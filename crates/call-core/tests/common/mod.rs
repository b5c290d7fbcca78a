//! Shared harness: a manager on the simulated stack whose signaling peer is
//! driven directly by the test

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use rtcall_call_core::media::SimulatedMediaProvider;
use rtcall_call_core::peer::SimulatedPeerFactory;
use rtcall_call_core::{
    CallConfig, CallEndedInfo, CallEvent, CallEventHandler, CallId, CallSessionManager,
    InMemoryCallRecordService, MediaStack, MediaStream,
};
use rtcall_signaling_core::{
    CallerIdentity, IceCandidate, LoopbackTransport, MediaKind, SessionDescription,
    SignalingChannel, SignalingMessage,
};

/// Upper bound for anything the tests wait on (virtual time)
pub const WAIT: Duration = Duration::from_secs(120);

/// Forwards every event to a channel
pub struct Collector {
    tx: mpsc::UnboundedSender<CallEvent>,
}

#[async_trait]
impl CallEventHandler for Collector {
    async fn on_call_started(&self, _call_id: CallId) {}
    async fn on_call_ended(&self, _info: CallEndedInfo) {}
    async fn on_remote_stream_received(&self, _stream: MediaStream) {}
    async fn on_error(&self, _message: String) {}

    async fn on_call_event(&self, event: CallEvent) {
        let _ = self.tx.send(event);
    }
}

pub struct Harness {
    pub manager: CallSessionManager,
    pub provider: Arc<SimulatedMediaProvider>,
    pub peers: Arc<SimulatedPeerFactory>,
    pub records: Arc<InMemoryCallRecordService>,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
    /// The far end of the signaling link
    pub remote: Arc<SignalingChannel>,
    /// Messages the manager sent to the far end
    pub outbox: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(CallConfig::new()).await
    }

    pub async fn with_config(config: CallConfig) -> Self {
        let (local, far) = LoopbackTransport::pair();
        let (remote, outbox) = collecting_channel(far);
        let (manager, provider, peers, records, events) =
            build_manager(config, SignalingChannel::new(local)).await;
        Self {
            manager,
            provider,
            peers,
            records,
            events,
            remote,
            outbox,
        }
    }

    /// Wait for the first event matching `pred`, skipping others
    pub async fn wait_event<F>(&mut self, pred: F) -> CallEvent
    where
        F: Fn(&CallEvent) -> bool,
    {
        wait_event(&mut self.events, pred).await
    }

    /// Wait for the next message of type `message_type` sent by the manager
    pub async fn wait_sent(&mut self, message_type: &str) -> SignalingMessage {
        loop {
            let message = tokio::time::timeout(WAIT, self.outbox.recv())
                .await
                .expect("timed out waiting for a signaling message")
                .expect("signaling link closed");
            if message.message_type() == message_type {
                return message;
            }
        }
    }

    /// Drain every event delivered so far
    pub async fn drain_events(&mut self) -> Vec<CallEvent> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }

    /// Act as a remote caller: invite followed by the offer
    pub async fn ring_in(&self, call_id: &str, kind: MediaKind) -> CallId {
        let call_id = CallId::from(call_id);
        self.remote
            .send(SignalingMessage::incoming_call(
                call_id.clone(),
                CallerIdentity::new("u2", "Remote User"),
                kind,
            ))
            .await;
        self.remote
            .send(SignalingMessage::offer(call_id.clone(), remote_offer(), kind))
            .await;
        call_id
    }

    pub async fn send_remote(&self, message: SignalingMessage) {
        self.remote.send(message).await;
    }
}

pub async fn build_manager(
    config: CallConfig,
    signaling: Arc<SignalingChannel>,
) -> (
    CallSessionManager,
    Arc<SimulatedMediaProvider>,
    Arc<SimulatedPeerFactory>,
    Arc<InMemoryCallRecordService>,
    mpsc::UnboundedReceiver<CallEvent>,
) {
    let provider = Arc::new(SimulatedMediaProvider::new(Duration::from_millis(
        config.simulated.acquire_delay_ms,
    )));
    let peers = Arc::new(SimulatedPeerFactory::new(&config.simulated));
    let records = Arc::new(InMemoryCallRecordService::new());

    let manager = CallSessionManager::builder()
        .config(config)
        .signaling(signaling)
        .call_records(records.clone())
        .media_stack(MediaStack::from_parts(provider.clone(), peers.clone()))
        .build()
        .await
        .expect("manager builds");

    let (tx, events) = mpsc::unbounded_channel();
    manager.add_event_handler(Arc::new(Collector { tx }));
    (manager, provider, peers, records, events)
}

pub fn collecting_channel(
    transport: Arc<LoopbackTransport>,
) -> (Arc<SignalingChannel>, mpsc::UnboundedReceiver<SignalingMessage>) {
    let channel = SignalingChannel::new(transport);
    let (tx, rx) = mpsc::unbounded_channel();
    channel.on_message(move |m: SignalingMessage| {
        let _ = tx.send(m);
    });
    channel.start();
    (channel, rx)
}

pub async fn wait_event<F>(events: &mut mpsc::UnboundedReceiver<CallEvent>, pred: F) -> CallEvent
where
    F: Fn(&CallEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for a call event")
            .expect("event handler dropped");
        if pred(&event) {
            return event;
        }
    }
}

pub fn remote_offer() -> SessionDescription {
    SessionDescription::offer("v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=remote\r\nt=0 0\r\n")
}

pub fn remote_answer() -> SessionDescription {
    SessionDescription::answer("v=0\r\no=- 3 4 IN IP4 127.0.0.1\r\ns=remote\r\nt=0 0\r\n")
}

pub fn remote_candidate(index: usize) -> IceCandidate {
    IceCandidate::new(format!(
        "candidate:{} 1 udp 2130706431 198.51.100.{} {} typ host",
        index + 1,
        index + 1,
        40_000 + index
    ))
}
