//! Call session manager
//!
//! [`CallSessionManager`] is the handle the presentation layer holds. It is
//! cheap to clone; every clone talks to the same actor task, which owns the
//! single call session.
//!
//! # Example
//!
//! ```rust,no_run
//! use rtcall_call_core::{CallConfig, CallSessionManagerBuilder};
//! use rtcall_signaling_core::{LoopbackTransport, SignalingChannel};
//!
//! # async fn example() -> rtcall_call_core::CallResult<()> {
//! let (local, _remote) = LoopbackTransport::pair();
//! let manager = CallSessionManagerBuilder::new()
//!     .config(CallConfig::new())
//!     .signaling(SignalingChannel::new(local))
//!     .build()
//!     .await?;
//!
//! let call_id = manager.try_start_call("bob", true).await?;
//! println!("dialing {} ({:?})", call_id, manager.state());
//! manager.end_call().await;
//! # Ok(())
//! # }
//! ```

mod actor;
mod settled;
mod timer;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use rtcall_signaling_core::{HandlerId, SignalingChannel, SignalingMessage};

use self::actor::{ActorContext, CallActor, Command};
use crate::config::CallConfig;
use crate::environment::{EnvironmentCapabilitySelector, MediaStack};
use crate::error::{CallError, CallResult};
use crate::events::{CallEvent, CallEventHandler, EventEmitter, EventStream, EventSubscription, SubscriptionId};
use crate::record::{CallRecordService, InMemoryCallRecordService};
use crate::types::{CallId, CallSnapshot, CallState, CallerIdentity, CameraFacing};

/// Builder for [`CallSessionManager`]
///
/// A signaling channel is required. The call-record service defaults to
/// [`InMemoryCallRecordService`]; the media stack defaults to whatever
/// [`EnvironmentCapabilitySelector`] picks for `config.media_mode`.
#[derive(Default)]
pub struct CallSessionManagerBuilder {
    config: Option<CallConfig>,
    signaling: Option<Arc<SignalingChannel>>,
    records: Option<Arc<dyn CallRecordService>>,
    media: Option<MediaStack>,
}

impl CallSessionManagerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the signaling channel the manager listens and sends on
    pub fn signaling(mut self, signaling: Arc<SignalingChannel>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    /// Set the call-record service
    pub fn call_records(mut self, records: Arc<dyn CallRecordService>) -> Self {
        self.records = Some(records);
        self
    }

    /// Inject a media stack instead of selecting one
    pub fn media_stack(mut self, media: MediaStack) -> Self {
        self.media = Some(media);
        self
    }

    /// Build the manager and start its actor
    pub async fn build(self) -> CallResult<CallSessionManager> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let signaling = self
            .signaling
            .ok_or_else(|| CallError::config("a signaling channel is required"))?;
        let records = self
            .records
            .unwrap_or_else(|| Arc::new(InMemoryCallRecordService::new()));
        let media = match self.media {
            Some(media) => media,
            None => EnvironmentCapabilitySelector::new(config.clone()).select().await?,
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<CallEvent>();
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::idle());
        let emitter = Arc::new(EventEmitter::new(config.event_channel_capacity));

        let inbound = command_tx.downgrade();
        let handler_id = signaling.on_message(move |message: SignalingMessage| {
            if let Some(commands) = inbound.upgrade() {
                let _ = commands.send(Command::Signal(message));
            }
        });

        let strict_transitions = config.strict_transitions;
        let variant = media.variant;
        let actor = CallActor::new(ActorContext {
            config,
            signaling: signaling.clone(),
            records,
            media,
            events: event_tx,
            snapshot: snapshot_tx,
            commands: command_tx.downgrade(),
        });
        tokio::spawn(actor.run(command_rx));

        let dispatcher = emitter.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                dispatcher.emit(event).await;
            }
            debug!("event dispatcher stopped");
        });

        signaling.start();
        info!(media = %variant, "call session manager started");

        Ok(CallSessionManager {
            inner: Arc::new(Inner {
                commands: command_tx,
                snapshot: snapshot_rx,
                emitter,
                signaling,
                handler_id,
                strict_transitions,
            }),
        })
    }
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<CallSnapshot>,
    emitter: Arc<EventEmitter>,
    signaling: Arc<SignalingChannel>,
    handler_id: HandlerId,
    strict_transitions: bool,
}

impl Drop for Inner {
    // The actor ends any session once the command channel closes
    fn drop(&mut self) {
        self.signaling.remove_handler(self.handler_id);
    }
}

/// Handle to the call session actor
#[derive(Clone)]
pub struct CallSessionManager {
    inner: Arc<Inner>,
}

impl CallSessionManager {
    /// Start building a manager
    pub fn builder() -> CallSessionManagerBuilder {
        CallSessionManagerBuilder::new()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> CallResult<T> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(make(reply))
            .map_err(|_| CallError::ManagerShutdown)?;
        rx.await.map_err(|_| CallError::ManagerShutdown)
    }

    fn check<T>(&self, result: CallResult<T>) -> CallResult<T> {
        if self.inner.strict_transitions {
            if let Err(e) = &result {
                if matches!(e, CallError::InvalidStateTransition { .. }) {
                    panic!("{}", e);
                }
            }
        }
        result
    }

    // ---- call lifecycle ----

    /// Place an outgoing call; only valid while idle
    pub async fn try_start_call(&self, target_id: &str, wants_video: bool) -> CallResult<CallId> {
        let target_id = target_id.to_string();
        let result = self
            .request(|reply| Command::StartCall {
                target_id,
                wants_video,
                reply,
            })
            .await
            .and_then(|r| r);
        self.check(result)
    }

    /// Place an outgoing call, reporting only success
    ///
    /// Failures are surfaced through the `on_error` event.
    pub async fn start_call(&self, target_id: &str, wants_video: bool) -> bool {
        self.try_start_call(target_id, wants_video).await.is_ok()
    }

    /// Accept the ringing call
    pub async fn try_accept_call(&self) -> CallResult<CallId> {
        let result = self
            .request(|reply| Command::AcceptCall { reply })
            .await
            .and_then(|r| r);
        self.check(result)
    }

    /// Accept the ringing call, reporting only success
    pub async fn accept_call(&self) -> bool {
        self.try_accept_call().await.is_ok()
    }

    /// Decline the ringing call without touching local media
    pub async fn decline_call(&self) -> CallResult<()> {
        let result = self
            .request(|reply| Command::DeclineCall { reply })
            .await
            .and_then(|r| r);
        self.check(result)
    }

    /// End the current call
    ///
    /// Safe to call in any state and any number of times. Returns once every
    /// resource held by the session has been released.
    pub async fn end_call(&self) {
        match self.request(|reply| Command::EndCall { reply }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) | Err(e) => debug!(error = %e, "end_call had nothing to end"),
        }
    }

    /// Decline the call waiting behind the current one
    pub async fn dismiss_waiting_call(&self) -> bool {
        self.request(|reply| Command::DismissWaiting { reply })
            .await
            .unwrap_or(false)
    }

    // ---- media controls ----

    /// Toggle the microphone; returns whether it is now muted
    pub async fn toggle_mute(&self) -> bool {
        match self.request(|reply| Command::ToggleMute { reply }).await {
            Ok(muted) => muted,
            Err(_) => self.is_muted(),
        }
    }

    /// Toggle the camera; returns whether it is now off
    pub async fn toggle_video(&self) -> bool {
        match self.request(|reply| Command::ToggleVideo { reply }).await {
            Ok(video_off) => video_off,
            Err(_) => self.is_video_off(),
        }
    }

    /// Switch between front and back camera
    ///
    /// Without a local stream this returns the current facing unchanged.
    pub async fn switch_camera(&self) -> CallResult<CameraFacing> {
        let result = self
            .request(|reply| Command::SwitchCamera { reply })
            .await
            .and_then(|r| r);
        self.check(result)
    }

    // ---- accessors ----

    /// Copy of the current session state
    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Watch receiver that changes whenever the snapshot does
    pub fn watch_snapshot(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.snapshot.clone()
    }

    /// Current manager state
    pub fn state(&self) -> CallState {
        self.inner.snapshot.borrow().state
    }

    /// Whether the microphone is muted
    pub fn is_muted(&self) -> bool {
        self.inner.snapshot.borrow().is_muted
    }

    /// Whether the camera is off
    pub fn is_video_off(&self) -> bool {
        self.inner.snapshot.borrow().is_video_off
    }

    /// Seconds spent in `Active` for the current call
    pub fn duration_secs(&self) -> u64 {
        self.inner.snapshot.borrow().duration_secs
    }

    /// Remote party of the current call
    pub fn caller(&self) -> Option<CallerIdentity> {
        self.inner.snapshot.borrow().remote_party.clone()
    }

    // ---- events ----

    /// Register an event handler
    pub fn add_event_handler(&self, handler: Arc<dyn CallEventHandler>) -> SubscriptionId {
        self.inner.emitter.subscribe(EventSubscription::new(handler))
    }

    /// Unregister an event handler; returns false if it was not registered
    pub fn remove_event_handler(&self, id: SubscriptionId) -> bool {
        self.inner.emitter.unsubscribe(id)
    }

    /// Stream of all future events
    pub fn subscribe_events(&self) -> EventStream {
        self.inner.emitter.stream()
    }

    /// End any session and stop the actor
    ///
    /// Every operation made afterwards fails with
    /// [`CallError::ManagerShutdown`] or is a no-op.
    pub async fn shutdown(&self) {
        if self.request(|reply| Command::Shutdown { reply }).await.is_err() {
            warn!("call session manager already shut down");
            return;
        }
        self.inner.signaling.remove_handler(self.inner.handler_id);
        info!("call session manager shut down");
    }
}
