//! Local media capture
//!
//! [`MediaCapabilityProvider`] is the only way the rest of the system touches
//! the microphone and camera. Two implementations share the interface:
//!
//! ```text
//! ┌──────────────────────┐      ┌─────────────────────────────┐
//! │  CallSessionManager  │─────▶│  MediaCapabilityProvider    │
//! └──────────────────────┘      ├──────────────┬──────────────┤
//!                               │  Hardware    │  Simulated   │
//!                               │ CaptureBackend│ synthetic   │
//!                               │ (cpal, ...)  │ handles      │
//!                               └──────────────┴──────────────┘
//! ```
//!
//! The hardware provider can fail with [`CallError::CapabilityUnavailable`](crate::CallError::CapabilityUnavailable);
//! the simulated one always succeeds but keeps the same async timing.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CallResult;
use crate::types::{CameraFacing, MediaStream};

pub mod hardware;
pub mod simulated;

#[cfg(feature = "device-cpal")]
pub mod cpal_backend;

pub use hardware::{CaptureBackend, CaptureHandle, DeviceAvailability, HardwareMediaProvider};
pub use simulated::SimulatedMediaProvider;

#[cfg(feature = "device-cpal")]
pub use cpal_backend::CpalCaptureBackend;

/// Which implementation backs a provider or adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaVariant {
    /// Real devices and negotiation engine
    Hardware,
    /// Synthetic media
    Simulated,
}

impl fmt::Display for MediaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware => f.write_str("hardware"),
            Self::Simulated => f.write_str("simulated"),
        }
    }
}

/// Local capture operations
#[async_trait]
pub trait MediaCapabilityProvider: Send + Sync {
    /// Which implementation this is
    fn variant(&self) -> MediaVariant;

    /// Acquire microphone (and camera when `wants_video`)
    ///
    /// Idempotent: a stream that is already held is released first.
    async fn acquire_local_stream(&self, wants_video: bool) -> CallResult<MediaStream>;

    /// Release whatever is held; a no-op when nothing is
    async fn release_local_stream(&self);

    /// Whether a local stream is currently held
    fn has_local_stream(&self) -> bool;

    /// Flip the microphone; returns the new "is muted" state
    async fn toggle_mute(&self) -> bool;

    /// Flip the camera; returns the new "is video off" state
    async fn toggle_video(&self) -> bool;

    /// Switch between front and back camera; returns the camera now in use
    async fn switch_camera(&self) -> CallResult<CameraFacing>;
}
