//! Hardware-backed media provider
//!
//! Talks to real capture devices through a [`CaptureBackend`]. Opening a
//! device can fail (missing hardware, permission denied); the provider turns
//! that into [`CallError::CapabilityUnavailable`] and never leaves a
//! half-opened stream behind.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{MediaCapabilityProvider, MediaVariant};
use crate::error::{CallError, CallResult};
use crate::types::{CameraFacing, MediaStream};

/// What a backend can see on this host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceAvailability {
    /// A microphone can be opened
    pub microphone: bool,
    /// Number of cameras
    pub cameras: usize,
}

impl DeviceAvailability {
    /// At least one camera is present
    pub fn has_camera(&self) -> bool {
        self.cameras > 0
    }
}

/// An open capture device
pub trait CaptureHandle: Send + Sync {
    /// Device label
    fn label(&self) -> String;

    /// Enable or silence the device without closing it
    fn set_enabled(&self, enabled: bool);

    /// Close the device; further calls are no-ops
    fn stop(&self);
}

/// Platform capture access
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Inspect available devices without opening them
    async fn probe(&self) -> DeviceAvailability;

    /// Open the default microphone
    async fn open_microphone(&self) -> CallResult<Box<dyn CaptureHandle>>;

    /// Open the camera facing `facing`
    async fn open_camera(&self, facing: CameraFacing) -> CallResult<Box<dyn CaptureHandle>>;
}

struct Held {
    stream: MediaStream,
    microphone: Box<dyn CaptureHandle>,
    camera: Option<Box<dyn CaptureHandle>>,
    facing: CameraFacing,
    muted: bool,
    video_off: bool,
}

impl Held {
    fn stop(self) {
        self.microphone.stop();
        if let Some(camera) = self.camera {
            camera.stop();
        }
        debug!(stream_id = %self.stream.id, "hardware capture stopped");
    }
}

/// Provider over real capture devices
pub struct HardwareMediaProvider<B: CaptureBackend> {
    backend: B,
    held: Mutex<Option<Held>>,
    has_stream: AtomicBool,
    last_muted: AtomicBool,
    last_video_off: AtomicBool,
}

impl<B: CaptureBackend> HardwareMediaProvider<B> {
    /// Wrap a backend
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            held: Mutex::new(None),
            has_stream: AtomicBool::new(false),
            last_muted: AtomicBool::new(false),
            last_video_off: AtomicBool::new(true),
        }
    }

    /// Probe the underlying backend
    pub async fn probe(&self) -> DeviceAvailability {
        self.backend.probe().await
    }

    fn publish(&self, held: &Option<Held>) {
        self.has_stream.store(held.is_some(), Ordering::SeqCst);
        if let Some(h) = held {
            self.last_muted.store(h.muted, Ordering::SeqCst);
            self.last_video_off.store(h.video_off, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl<B: CaptureBackend + 'static> MediaCapabilityProvider for HardwareMediaProvider<B> {
    fn variant(&self) -> MediaVariant {
        MediaVariant::Hardware
    }

    async fn acquire_local_stream(&self, wants_video: bool) -> CallResult<MediaStream> {
        let mut held = self.held.lock().await;
        if let Some(previous) = held.take() {
            previous.stop();
        }
        self.publish(&held);

        let microphone = self.backend.open_microphone().await.map_err(|e| {
            warn!(backend = self.backend.name(), error = %e, "microphone unavailable");
            e
        })?;

        let camera = if wants_video {
            match self.backend.open_camera(CameraFacing::Front).await {
                Ok(camera) => Some(camera),
                Err(e) => {
                    warn!(backend = self.backend.name(), error = %e, "camera unavailable");
                    microphone.stop();
                    return Err(e);
                }
            }
        } else {
            None
        };

        let label = match &camera {
            Some(camera) => format!("{} + {}", microphone.label(), camera.label()),
            None => microphone.label(),
        };
        let stream = MediaStream::local(wants_video, label);
        info!(
            backend = self.backend.name(),
            stream_id = %stream.id,
            wants_video,
            "hardware capture started"
        );

        *held = Some(Held {
            stream: stream.clone(),
            microphone,
            camera,
            facing: CameraFacing::Front,
            muted: false,
            video_off: !wants_video,
        });
        self.publish(&held);
        Ok(stream)
    }

    async fn release_local_stream(&self) {
        let mut held = self.held.lock().await;
        if let Some(previous) = held.take() {
            previous.stop();
        }
        self.publish(&held);
    }

    fn has_local_stream(&self) -> bool {
        self.has_stream.load(Ordering::SeqCst)
    }

    async fn toggle_mute(&self) -> bool {
        let mut held = self.held.lock().await;
        let Some(h) = held.as_mut() else {
            return self.last_muted.load(Ordering::SeqCst);
        };
        h.muted = !h.muted;
        h.microphone.set_enabled(!h.muted);
        let muted = h.muted;
        self.publish(&held);
        muted
    }

    async fn toggle_video(&self) -> bool {
        let mut held = self.held.lock().await;
        let Some(h) = held.as_mut() else {
            return self.last_video_off.load(Ordering::SeqCst);
        };
        let Some(camera) = h.camera.as_ref() else {
            return h.video_off;
        };
        h.video_off = !h.video_off;
        camera.set_enabled(!h.video_off);
        let video_off = h.video_off;
        self.publish(&held);
        video_off
    }

    async fn switch_camera(&self) -> CallResult<CameraFacing> {
        let mut held = self.held.lock().await;
        let h = held
            .as_mut()
            .ok_or_else(|| CallError::capability_unavailable("no local stream"))?;
        if h.camera.is_none() {
            return Err(CallError::capability_unavailable("voice call has no camera"));
        }
        if self.backend.probe().await.cameras < 2 {
            return Err(CallError::capability_unavailable("only one camera available"));
        }

        let target = h.facing.flipped();
        let replacement = self.backend.open_camera(target).await?;
        replacement.set_enabled(!h.video_off);
        if let Some(old) = h.camera.replace(replacement) {
            old.stop();
        }
        h.facing = target;
        debug!(facing = ?target, "camera switched");
        Ok(target)
    }
}
