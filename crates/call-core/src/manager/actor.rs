//! The call session actor
//!
//! One task owns every piece of session state. Presentation operations,
//! inbound signaling, adapter events, timer ticks and timeouts all arrive as
//! [`Command`]s on one channel and are handled strictly one at a time, so
//! the state machine never sees two operations interleave.
//!
//! ```text
//!            start_call                 remote answer            Connected
//!   Idle ───────────────▶ Dialing ────────────────▶ Connecting ──────────▶ Active
//!    │  ▲                                              ▲                     │
//!    │  │ teardown                       accept_call   │                     │
//!    │  └──────── Ending ◀── end / decline / failure ──┼─────────────────────┘
//!    │                                                 │
//!    └── incoming_call ──▶ Ringing ────────────────────┘
//! ```
//!
//! Every path back to `Idle` runs through [`CallActor::teardown`], which is
//! what makes ending idempotent: once the session is gone there is nothing
//! left to tear down.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, WeakUnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use rtcall_signaling_core::{SignalingChannel, SignalingMessage, SignalingPayload};

use super::settled::SettledCalls;
use super::timer::{spawn_duration_ticker, spawn_timeout};
use crate::config::{BusyPolicy, CallConfig};
use crate::environment::MediaStack;
use crate::error::{CallError, CallResult};
use crate::events::{CallEndedInfo, CallEvent};
use crate::peer::{IceCandidateBuffer, PeerConnectionAdapter, PeerEvent, PeerEventReceiver, PeerSessionParams};
use crate::record::CallRecordService;
use crate::recovery::{ErrorContext, with_timeout};
use crate::types::{
    CallDirection, CallId, CallRole, CallSnapshot, CallState, CallerIdentity, CameraFacing,
    ConnectionState, EndReason, IceCandidate, MediaKind, MediaStream, PendingInvite,
    SessionDescription,
};

type Reply<T> = oneshot::Sender<T>;

/// Everything the actor reacts to
pub(crate) enum Command {
    StartCall {
        target_id: String,
        wants_video: bool,
        reply: Reply<CallResult<CallId>>,
    },
    AcceptCall {
        reply: Reply<CallResult<CallId>>,
    },
    DeclineCall {
        reply: Reply<CallResult<()>>,
    },
    EndCall {
        reply: Reply<CallResult<()>>,
    },
    ToggleMute {
        reply: Reply<bool>,
    },
    ToggleVideo {
        reply: Reply<bool>,
    },
    SwitchCamera {
        reply: Reply<CallResult<CameraFacing>>,
    },
    DismissWaiting {
        reply: Reply<bool>,
    },
    Signal(SignalingMessage),
    Peer {
        generation: u64,
        event: PeerEvent,
    },
    Tick {
        generation: u64,
    },
    Timeout {
        generation: u64,
        kind: TimeoutKind,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Which session timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeoutKind {
    /// Incoming call was not answered in time
    Ring,
    /// Dialing/Connecting took too long
    Negotiation,
}

/// Message sent to the peer as part of a teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notify {
    Nothing,
    End,
    Decline,
}

/// The single call in progress
struct Session {
    call_id: CallId,
    direction: CallDirection,
    kind: MediaKind,
    remote: CallerIdentity,
    adapter: Option<Box<dyn PeerConnectionAdapter>>,
    connection_state: ConnectionState,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    /// Offer received before the local user accepted
    remote_offer: Option<SessionDescription>,
    /// Remote candidates received before the adapter existed
    held_candidates: IceCandidateBuffer,
    /// Accepted, but the offer has not arrived yet
    answer_pending: bool,
    /// A call record exists that must be closed
    record_active: bool,
    started_at: Option<DateTime<Utc>>,
    duration_secs: u64,
}

impl Session {
    fn outgoing(call_id: CallId, target_id: &str, kind: MediaKind) -> Self {
        Self::new(
            call_id,
            CallDirection::Outgoing,
            kind,
            CallerIdentity::new(target_id, target_id),
        )
    }

    fn incoming(invite: &PendingInvite, held_candidates: IceCandidateBuffer) -> Self {
        let mut session = Self::new(
            invite.call_id.clone(),
            CallDirection::Incoming,
            invite.kind,
            invite.caller.clone(),
        );
        session.remote_offer = invite.remote_offer.clone();
        session.held_candidates = held_candidates;
        session
    }

    fn new(
        call_id: CallId,
        direction: CallDirection,
        kind: MediaKind,
        remote: CallerIdentity,
    ) -> Self {
        Self {
            call_id,
            direction,
            kind,
            remote,
            adapter: None,
            connection_state: ConnectionState::New,
            local_stream: None,
            remote_stream: None,
            remote_offer: None,
            held_candidates: IceCandidateBuffer::new(),
            answer_pending: false,
            record_active: false,
            started_at: None,
            duration_secs: 0,
        }
    }

    fn role(&self) -> CallRole {
        self.direction.into()
    }
}

/// Collaborators handed to the actor at construction
pub(crate) struct ActorContext {
    pub config: CallConfig,
    pub signaling: Arc<SignalingChannel>,
    pub records: Arc<dyn CallRecordService>,
    pub media: MediaStack,
    pub events: mpsc::UnboundedSender<CallEvent>,
    pub snapshot: watch::Sender<CallSnapshot>,
    pub commands: WeakUnboundedSender<Command>,
}

pub(crate) struct CallActor {
    config: CallConfig,
    signaling: Arc<SignalingChannel>,
    records: Arc<dyn CallRecordService>,
    media: MediaStack,
    events: mpsc::UnboundedSender<CallEvent>,
    snapshot: watch::Sender<CallSnapshot>,
    commands: WeakUnboundedSender<Command>,

    state: CallState,
    session: Option<Session>,
    waiting: Option<PendingInvite>,
    waiting_candidates: IceCandidateBuffer,
    settled: SettledCalls,
    generation: u64,
    is_muted: bool,
    is_video_off: bool,
    camera_facing: CameraFacing,

    ticker: Option<JoinHandle<()>>,
    session_timer: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl CallActor {
    pub(crate) fn new(ctx: ActorContext) -> Self {
        Self {
            config: ctx.config,
            signaling: ctx.signaling,
            records: ctx.records,
            media: ctx.media,
            events: ctx.events,
            snapshot: ctx.snapshot,
            commands: ctx.commands,
            state: CallState::Idle,
            session: None,
            waiting: None,
            waiting_candidates: IceCandidateBuffer::new(),
            settled: SettledCalls::default(),
            generation: 0,
            is_muted: false,
            is_video_off: false,
            camera_facing: CameraFacing::Front,
            ticker: None,
            session_timer: None,
            forwarder: None,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(media = %self.media.variant, "call session actor started");
        let mut shutdown_reply = None;
        while let Some(command) = commands.recv().await {
            if let Command::Shutdown { reply } = command {
                shutdown_reply = Some(reply);
                break;
            }
            self.handle(command).await;
        }

        self.shutdown().await;
        self.stop_session_tasks();
        info!("call session actor stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::StartCall {
                target_id,
                wants_video,
                reply,
            } => {
                let result = self.start_call(target_id, wants_video).await;
                let _ = reply.send(result);
            }
            Command::AcceptCall { reply } => {
                let result = self.accept_call().await;
                let _ = reply.send(result);
            }
            Command::DeclineCall { reply } => {
                let result = self.decline_call().await;
                let _ = reply.send(result);
            }
            Command::EndCall { reply } => {
                let result = self.end_call().await;
                let _ = reply.send(result);
            }
            Command::ToggleMute { reply } => {
                let muted = self.toggle_mute().await;
                let _ = reply.send(muted);
            }
            Command::ToggleVideo { reply } => {
                let video_off = self.toggle_video().await;
                let _ = reply.send(video_off);
            }
            Command::SwitchCamera { reply } => {
                let result = self.switch_camera().await;
                let _ = reply.send(result);
            }
            Command::DismissWaiting { reply } => {
                let dismissed = self.dismiss_waiting().await;
                let _ = reply.send(dismissed);
            }
            Command::Signal(message) => self.on_signal(message).await,
            Command::Peer { generation, event } => self.on_peer_event(generation, event).await,
            Command::Tick { generation } => self.on_tick(generation),
            Command::Timeout { generation, kind } => self.on_timeout(generation, kind).await,
            Command::Shutdown { .. } => unreachable!("shutdown is handled by the run loop"),
        }
    }

    // ---- presentation operations ----

    async fn start_call(&mut self, target_id: String, wants_video: bool) -> CallResult<CallId> {
        if self.state != CallState::Idle {
            return self.reject("start call");
        }
        let kind = MediaKind::from_wants_video(wants_video);

        let call_id = match with_timeout(
            "create call record",
            self.config.record_request_timeout(),
            self.records.create_call(&target_id, kind),
        )
        .await
        .context("create call record")
        {
            Ok(call_id) => call_id,
            Err(e) => return Err(self.setup_failed(e)),
        };

        self.generation += 1;
        let mut session = Session::outgoing(call_id.clone(), &target_id, kind);
        session.record_active = true;

        let (offer, peer_events) = match self.prepare_outgoing(&mut session).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.release_resources(&mut session).await;
                return Err(self.setup_failed(e));
            }
        };

        self.is_muted = false;
        self.is_video_off = !wants_video;
        self.session = Some(session);
        self.spawn_forwarder(peer_events);

        if self.config.announce_invites {
            self.signaling
                .send(SignalingMessage::incoming_call(
                    call_id.clone(),
                    self.config.local_identity.clone(),
                    kind,
                ))
                .await;
        }
        self.signaling
            .send(SignalingMessage::offer(call_id.clone(), offer, kind))
            .await;

        self.transition(CallState::Dialing);
        self.arm_timer(TimeoutKind::Negotiation);
        info!(%call_id, target_id = %target_id, ?kind, "outgoing call placed");
        self.emit(CallEvent::CallStarted {
            call_id: call_id.clone(),
        });
        Ok(call_id)
    }

    async fn prepare_outgoing(
        &self,
        session: &mut Session,
    ) -> CallResult<(SessionDescription, PeerEventReceiver)> {
        let local = self
            .media
            .provider
            .acquire_local_stream(session.kind.has_video())
            .await?;
        session.local_stream = Some(local);

        let (adapter, peer_events) = self
            .media
            .peers
            .create(PeerSessionParams {
                call_id: session.call_id.clone(),
                kind: session.kind,
                role: session.role(),
            })
            .await?;
        let offer = adapter.create_offer().await;
        session.adapter = Some(adapter);
        Ok((offer?, peer_events))
    }

    async fn accept_call(&mut self) -> CallResult<CallId> {
        if self.state != CallState::Ringing {
            return self.reject("accept call");
        }
        self.cancel_session_timer();

        if let Err(e) = self.prepare_incoming().await {
            error!(error = %e, category = e.category(), "failed to accept call");
            self.emit(CallEvent::Error {
                message: e.to_string(),
            });
            self.teardown(EndReason::Failed, false, Notify::End).await;
            return Err(e);
        }

        let Some(session) = self.session.as_mut() else {
            return Err(CallError::internal("session vanished during accept"));
        };
        session.started_at = Some(Utc::now());
        let call_id = session.call_id.clone();
        let kind = session.kind;

        self.is_muted = false;
        self.is_video_off = !kind.has_video();
        self.transition(CallState::Connecting);
        self.arm_timer(TimeoutKind::Negotiation);
        info!(%call_id, ?kind, "incoming call accepted");
        self.emit(CallEvent::CallStarted {
            call_id: call_id.clone(),
        });
        Ok(call_id)
    }

    async fn prepare_incoming(&mut self) -> CallResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CallError::internal("ringing without a session"))?;

        let local = self
            .media
            .provider
            .acquire_local_stream(session.kind.has_video())
            .await?;
        session.local_stream = Some(local);

        let (adapter, peer_events) = self
            .media
            .peers
            .create(PeerSessionParams {
                call_id: session.call_id.clone(),
                kind: session.kind,
                role: session.role(),
            })
            .await?;
        for candidate in session.held_candidates.drain() {
            if let Err(e) = adapter.add_remote_ice_candidate(candidate).await {
                warn!(call_id = %session.call_id, error = %e, "held remote candidate rejected");
            }
        }
        session.adapter = Some(adapter);

        match with_timeout(
            "accept call record",
            self.config.record_request_timeout(),
            self.records.accept_call(&session.call_id),
        )
        .await
        {
            Ok(()) => session.record_active = true,
            Err(e) => warn!(call_id = %session.call_id, error = %e, "call record not accepted"),
        }

        let offer = session.remote_offer.take();
        if offer.is_none() {
            session.answer_pending = true;
        }
        self.spawn_forwarder(peer_events);

        match offer {
            Some(offer) => self.answer(offer).await,
            None => {
                debug!("accepted before the offer arrived; answering when it does");
                Ok(())
            }
        }
    }

    /// Apply the remote offer, then create and send the answer
    async fn answer(&mut self, offer: SessionDescription) -> CallResult<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| CallError::internal("no session to answer"))?;
        let adapter = session
            .adapter
            .as_ref()
            .ok_or_else(|| CallError::internal("no peer connection to answer with"))?;

        adapter.apply_remote_description(offer).await?;
        let answer = adapter.create_answer().await?;
        self.signaling
            .send(SignalingMessage::answer(session.call_id.clone(), answer))
            .await;
        Ok(())
    }

    async fn decline_call(&mut self) -> CallResult<()> {
        if self.state != CallState::Ringing {
            return self.reject("decline call");
        }
        self.teardown(EndReason::Declined, false, Notify::Decline).await;
        Ok(())
    }

    async fn end_call(&mut self) -> CallResult<()> {
        match self.state {
            CallState::Idle => debug!("end_call without a call in progress"),
            CallState::Ringing => {
                self.teardown(EndReason::Declined, false, Notify::Decline).await;
            }
            CallState::Dialing => {
                self.teardown(EndReason::Cancelled, false, Notify::End).await;
            }
            _ => self.teardown(EndReason::Hangup, false, Notify::End).await,
        }
        Ok(())
    }

    async fn toggle_mute(&mut self) -> bool {
        if self.state.has_local_media() && self.media.provider.has_local_stream() {
            self.is_muted = self.media.provider.toggle_mute().await;
            debug!(muted = self.is_muted, "microphone toggled");
            self.publish();
        }
        self.is_muted
    }

    async fn toggle_video(&mut self) -> bool {
        if self.state.has_local_media() && self.media.provider.has_local_stream() {
            self.is_video_off = self.media.provider.toggle_video().await;
            debug!(video_off = self.is_video_off, "camera toggled");
            self.publish();
        }
        self.is_video_off
    }

    async fn switch_camera(&mut self) -> CallResult<CameraFacing> {
        if self.state.has_local_media() && self.media.provider.has_local_stream() {
            self.camera_facing = self.media.provider.switch_camera().await?;
            debug!(facing = ?self.camera_facing, "camera switched");
        }
        Ok(self.camera_facing)
    }

    async fn dismiss_waiting(&mut self) -> bool {
        let Some(invite) = self.waiting.take() else {
            return false;
        };
        self.waiting_candidates = IceCandidateBuffer::new();
        self.settled.insert(invite.call_id.clone());
        info!(call_id = %invite.call_id, "waiting call dismissed");
        self.signaling
            .send(SignalingMessage::call_decline(
                invite.call_id.clone(),
                EndReason::Busy,
            ))
            .await;
        self.emit(CallEvent::CallWaitingCleared {
            call_id: invite.call_id,
        });
        self.publish();
        true
    }

    async fn shutdown(&mut self) {
        self.dismiss_waiting().await;
        let _ = self.end_call().await;
    }

    // ---- inbound signaling ----

    async fn on_signal(&mut self, message: SignalingMessage) {
        let SignalingMessage { call_id, payload } = message;
        debug!(%call_id, message_type = payload.message_type(), state = %self.state, "signaling message received");
        if self.settled.contains(&call_id)
            && matches!(
                payload,
                SignalingPayload::IncomingCall { .. }
                    | SignalingPayload::Offer { .. }
                    | SignalingPayload::IceCandidate { .. }
            )
        {
            debug!(%call_id, message_type = payload.message_type(), "message for a settled call ignored");
            return;
        }
        match payload {
            SignalingPayload::IncomingCall { caller, kind } => {
                self.on_invite(call_id, caller, kind, None).await
            }
            SignalingPayload::Offer { description, kind } => {
                self.on_remote_offer(call_id, description, kind).await
            }
            SignalingPayload::Answer { description } => {
                self.on_remote_answer(call_id, description).await
            }
            SignalingPayload::IceCandidate { candidate } => {
                self.on_remote_candidate(call_id, candidate).await
            }
            SignalingPayload::CallEnd { reason } => self.on_remote_end(call_id, reason, false).await,
            SignalingPayload::CallDecline { reason } => {
                self.on_remote_end(call_id, reason, true).await
            }
        }
    }

    fn is_current(&self, call_id: &CallId) -> bool {
        self.session.as_ref().is_some_and(|s| &s.call_id == call_id)
    }

    fn is_waiting(&self, call_id: &CallId) -> bool {
        self.waiting.as_ref().is_some_and(|w| &w.call_id == call_id)
    }

    async fn on_invite(
        &mut self,
        call_id: CallId,
        caller: CallerIdentity,
        kind: MediaKind,
        offer: Option<SessionDescription>,
    ) {
        if self.is_current(&call_id) || self.is_waiting(&call_id) {
            debug!(%call_id, "duplicate invite ignored");
            return;
        }

        let mut invite = PendingInvite::new(call_id, caller, kind);
        invite.remote_offer = offer;

        if self.state == CallState::Idle {
            self.ring(invite, IceCandidateBuffer::new());
            return;
        }

        match self.config.busy_policy {
            BusyPolicy::QueueAndNotify if self.waiting.is_none() => {
                info!(
                    call_id = %invite.call_id,
                    caller = %invite.caller.display_name,
                    "invite received while busy; holding as waiting call"
                );
                self.waiting = Some(invite.clone());
                self.waiting_candidates = IceCandidateBuffer::new();
                self.publish();
                self.emit(CallEvent::CallWaiting { invite });
            }
            _ => {
                info!(call_id = %invite.call_id, "invite received while busy; declining");
                self.settled.insert(invite.call_id.clone());
                self.signaling
                    .send(SignalingMessage::call_decline(invite.call_id, EndReason::Busy))
                    .await;
            }
        }
    }

    fn ring(&mut self, invite: PendingInvite, held_candidates: IceCandidateBuffer) {
        self.generation += 1;
        self.session = Some(Session::incoming(&invite, held_candidates));
        self.is_muted = false;
        self.is_video_off = !invite.kind.has_video();
        self.transition(CallState::Ringing);
        self.arm_timer(TimeoutKind::Ring);
        info!(
            call_id = %invite.call_id,
            caller = %invite.caller.display_name,
            kind = ?invite.kind,
            "incoming call ringing"
        );
        self.emit(CallEvent::IncomingCall { invite });
    }

    async fn on_remote_offer(
        &mut self,
        call_id: CallId,
        description: SessionDescription,
        kind: MediaKind,
    ) {
        if let Some(waiting) = self.waiting.as_mut().filter(|w| w.call_id == call_id) {
            waiting.remote_offer = Some(description);
            self.publish();
            return;
        }

        if !self.is_current(&call_id) {
            // Offer without a preceding invite
            self.on_invite(call_id, CallerIdentity::unknown(), kind, Some(description))
                .await;
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.adapter.is_none() {
            session.remote_offer = Some(description);
            debug!(%call_id, "offer stored until the call is accepted");
            return;
        }
        if !session.answer_pending {
            warn!(%call_id, "unexpected offer for an established session ignored");
            return;
        }
        session.answer_pending = false;
        if let Err(e) = self.answer(description).await {
            self.fail(e).await;
        }
    }

    async fn on_remote_answer(&mut self, call_id: CallId, description: SessionDescription) {
        if !self.is_current(&call_id) || self.state != CallState::Dialing {
            debug!(%call_id, state = %self.state, "answer ignored");
            return;
        }
        let result = match self.session.as_ref().and_then(|s| s.adapter.as_ref()) {
            Some(adapter) => adapter.apply_remote_description(description).await,
            None => Err(CallError::internal("dialing without a peer connection")),
        };
        match result {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.started_at = Some(Utc::now());
                }
                self.transition(CallState::Connecting);
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_remote_candidate(&mut self, call_id: CallId, candidate: IceCandidate) {
        if self.is_waiting(&call_id) {
            self.waiting_candidates.push(candidate);
            return;
        }
        match self.session.as_mut() {
            Some(session) if session.call_id == call_id => match session.adapter.as_ref() {
                Some(adapter) => {
                    if let Err(e) = adapter.add_remote_ice_candidate(candidate).await {
                        warn!(%call_id, error = %e, "remote candidate rejected");
                    }
                }
                None => session.held_candidates.push(candidate),
            },
            _ => debug!(%call_id, "candidate for unknown call ignored"),
        }
    }

    async fn on_remote_end(&mut self, call_id: CallId, reason: EndReason, declined: bool) {
        if self.is_waiting(&call_id) {
            self.waiting = None;
            self.waiting_candidates = IceCandidateBuffer::new();
            self.settled.insert(call_id.clone());
            info!(%call_id, %reason, "waiting call withdrawn by caller");
            self.publish();
            self.emit(CallEvent::CallWaitingCleared { call_id });
            return;
        }
        if !self.is_current(&call_id) {
            debug!(%call_id, "end for unknown call ignored");
            return;
        }
        if declined
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.direction != CallDirection::Outgoing)
        {
            debug!(%call_id, "decline for an incoming call ignored");
            return;
        }
        info!(%call_id, %reason, "call ended by remote party");
        self.teardown(reason, true, Notify::Nothing).await;
    }

    // ---- adapter events and timers ----

    async fn on_peer_event(&mut self, generation: u64, event: PeerEvent) {
        if generation != self.generation {
            trace!(generation, current = self.generation, "stale peer event dropped");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            PeerEvent::StateChanged(connection_state) => {
                session.connection_state = connection_state;
                match connection_state {
                    ConnectionState::Connected if self.state == CallState::Connecting => {
                        self.cancel_session_timer();
                        self.transition(CallState::Active);
                        self.ticker = Some(spawn_duration_ticker(
                            self.commands.clone(),
                            self.generation,
                        ));
                    }
                    ConnectionState::Failed => {
                        self.fail(CallError::negotiation_failed("peer connection failed"))
                            .await
                    }
                    ConnectionState::Disconnected => {
                        self.fail(CallError::negotiation_failed("peer connection lost"))
                            .await
                    }
                    _ => self.publish(),
                }
            }
            PeerEvent::LocalIceCandidate(candidate) => {
                let message = SignalingMessage::ice_candidate(session.call_id.clone(), candidate);
                self.signaling.send(message).await;
            }
            PeerEvent::RemoteStream(stream) => {
                session.remote_stream = Some(stream.clone());
                info!(call_id = %session.call_id, stream_id = %stream.id, "remote stream received");
                self.publish();
                self.emit(CallEvent::RemoteStreamReceived { stream });
            }
        }
    }

    fn on_tick(&mut self, generation: u64) {
        if generation != self.generation || self.state != CallState::Active {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.duration_secs += 1;
        let duration_secs = session.duration_secs;
        self.publish();
        self.emit(CallEvent::DurationTick { duration_secs });
    }

    async fn on_timeout(&mut self, generation: u64, kind: TimeoutKind) {
        if generation != self.generation {
            return;
        }
        match kind {
            TimeoutKind::Ring if self.state == CallState::Ringing => {
                info!(call_id = ?self.current_call_id(), "incoming call not answered");
                self.teardown(EndReason::NoAnswer, false, Notify::Decline).await;
            }
            TimeoutKind::Negotiation
                if matches!(self.state, CallState::Dialing | CallState::Connecting) =>
            {
                let timeout = self.config.negotiation_timeout();
                self.fail(CallError::Timeout {
                    operation: "call setup".to_string(),
                    duration_ms: timeout.as_millis() as u64,
                })
                .await;
            }
            _ => {}
        }
    }

    // ---- teardown ----

    /// Report a failure and end the session
    async fn fail(&mut self, e: CallError) {
        error!(
            call_id = ?self.current_call_id(),
            error = %e,
            category = e.category(),
            "call failed"
        );
        self.emit(CallEvent::Error {
            message: e.to_string(),
        });
        let reason = match e {
            CallError::Timeout { .. } => EndReason::Timeout,
            _ => EndReason::Failed,
        };
        self.teardown(reason, false, Notify::End).await;
    }

    /// The one way back to `Idle`
    async fn teardown(&mut self, reason: EndReason, remote: bool, notify: Notify) {
        if self.session.is_none() {
            return;
        }
        self.generation += 1;
        self.stop_session_tasks();
        self.transition(CallState::Ending);

        let Some(mut session) = self.session.take() else {
            return;
        };
        self.settled.insert(session.call_id.clone());
        match notify {
            Notify::End => {
                self.signaling
                    .send(SignalingMessage::call_end(session.call_id.clone(), reason))
                    .await
            }
            Notify::Decline => {
                self.signaling
                    .send(SignalingMessage::call_decline(
                        session.call_id.clone(),
                        reason,
                    ))
                    .await
            }
            Notify::Nothing => {}
        }

        self.release_resources(&mut session).await;
        self.is_muted = false;
        self.is_video_off = false;
        self.camera_facing = CameraFacing::Front;
        self.transition(CallState::Idle);

        info!(
            call_id = %session.call_id,
            %reason,
            remote,
            duration_secs = session.duration_secs,
            "call ended"
        );
        self.emit(CallEvent::CallEnded {
            info: CallEndedInfo {
                call_id: Some(session.call_id),
                reason,
                duration_secs: session.duration_secs,
                remote,
            },
        });

        self.promote_waiting();
    }

    /// Close the adapter, release local media and close the call record
    async fn release_resources(&self, session: &mut Session) {
        if let Some(adapter) = session.adapter.take() {
            adapter.close().await;
        }
        if session.local_stream.take().is_some() {
            self.media.provider.release_local_stream().await;
        }
        if session.record_active {
            session.record_active = false;
            if let Err(e) = with_timeout(
                "end call record",
                self.config.record_request_timeout(),
                self.records.end_call(&session.call_id),
            )
            .await
            {
                warn!(call_id = %session.call_id, error = %e, "call record not closed");
            }
        }
    }

    fn promote_waiting(&mut self) {
        if self.state != CallState::Idle {
            return;
        }
        if let Some(invite) = self.waiting.take() {
            let held = std::mem::take(&mut self.waiting_candidates);
            info!(call_id = %invite.call_id, "waiting call now ringing");
            self.emit(CallEvent::CallWaitingCleared {
                call_id: invite.call_id.clone(),
            });
            self.ring(invite, held);
        }
    }

    // ---- helpers ----

    fn reject<T>(&self, operation: &'static str) -> CallResult<T> {
        warn!(operation, state = %self.state, "invalid state transition rejected");
        Err(CallError::invalid_transition(operation, self.state))
    }

    fn setup_failed(&self, e: CallError) -> CallError {
        error!(error = %e, category = e.category(), "call setup failed");
        self.emit(CallEvent::Error {
            message: e.to_string(),
        });
        e
    }

    fn current_call_id(&self) -> Option<&CallId> {
        self.session.as_ref().map(|s| &s.call_id)
    }

    fn transition(&mut self, next: CallState) {
        if self.state == next {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);
        debug!(call_id = ?self.current_call_id(), %previous, current = %next, "call state changed");
        self.publish();
        self.emit(CallEvent::StateChanged {
            previous,
            current: next,
        });
    }

    fn arm_timer(&mut self, kind: TimeoutKind) {
        let after = match kind {
            TimeoutKind::Ring => self.config.ring_timeout(),
            TimeoutKind::Negotiation => self.config.negotiation_timeout(),
        };
        let timer = spawn_timeout(self.commands.clone(), self.generation, kind, after);
        if let Some(old) = self.session_timer.replace(timer) {
            old.abort();
        }
    }

    fn cancel_session_timer(&mut self) {
        if let Some(timer) = self.session_timer.take() {
            timer.abort();
        }
    }

    fn stop_session_tasks(&mut self) {
        self.cancel_session_timer();
        for task in [self.ticker.take(), self.forwarder.take()].into_iter().flatten() {
            task.abort();
        }
    }

    fn spawn_forwarder(&mut self, mut peer_events: PeerEventReceiver) {
        let commands = self.commands.clone();
        let generation = self.generation;
        let forwarder = tokio::spawn(async move {
            while let Some(event) = peer_events.recv().await {
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                if commands.send(Command::Peer { generation, event }).is_err() {
                    break;
                }
            }
        });
        if let Some(old) = self.forwarder.replace(forwarder) {
            old.abort();
        }
    }

    fn emit(&self, event: CallEvent) {
        if self.events.send(event).is_err() {
            debug!("event dispatcher gone; event dropped");
        }
    }

    fn publish(&self) {
        let snapshot = match &self.session {
            Some(session) => CallSnapshot {
                state: self.state,
                call_id: Some(session.call_id.clone()),
                direction: Some(session.direction),
                role: Some(session.role()),
                kind: Some(session.kind),
                connection_state: session.connection_state,
                is_muted: self.is_muted,
                is_video_off: self.is_video_off,
                duration_secs: session.duration_secs,
                remote_party: Some(session.remote.clone()),
                waiting_invite: self.waiting.clone(),
                local_stream: session.local_stream.clone(),
                remote_stream: session.remote_stream.clone(),
                started_at: session.started_at,
            },
            None => CallSnapshot {
                state: self.state,
                waiting_invite: self.waiting.clone(),
                ..CallSnapshot::idle()
            },
        };
        self.snapshot.send_replace(snapshot);
    }
}
