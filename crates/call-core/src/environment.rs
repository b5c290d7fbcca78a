//! Startup choice between the hardware and simulated media stacks
//!
//! The decision is made once, before the manager is built, and the chosen
//! [`MediaStack`] is injected into it. Nothing re-evaluates it per call.
//!
//! | `media_mode` | hardware compiled in and a microphone found | otherwise |
//! |---|---|---|
//! | `auto` | hardware | simulated |
//! | `hardware` | hardware | `CapabilityUnavailable` |
//! | `simulated` | simulated | simulated |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{CallConfig, MediaMode};
use crate::error::{CallError, CallResult};
use crate::media::{DeviceAvailability, MediaCapabilityProvider, MediaVariant, SimulatedMediaProvider};
use crate::peer::{PeerConnectionFactory, SimulatedPeerFactory};

/// The provider and adapter factory a manager runs on
#[derive(Clone)]
pub struct MediaStack {
    /// Which implementation pair this is
    pub variant: MediaVariant,
    /// Local capture
    pub provider: Arc<dyn MediaCapabilityProvider>,
    /// Negotiation engine factory
    pub peers: Arc<dyn PeerConnectionFactory>,
}

impl MediaStack {
    /// The simulated pair, timed by `config.simulated`
    pub fn simulated(config: &CallConfig) -> Self {
        Self {
            variant: MediaVariant::Simulated,
            provider: Arc::new(SimulatedMediaProvider::new(Duration::from_millis(
                config.simulated.acquire_delay_ms,
            ))),
            peers: Arc::new(SimulatedPeerFactory::new(&config.simulated)),
        }
    }

    /// Assemble a stack from explicit parts
    pub fn from_parts(
        provider: Arc<dyn MediaCapabilityProvider>,
        peers: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        Self {
            variant: provider.variant(),
            provider,
            peers,
        }
    }

    #[cfg(all(feature = "device-cpal", feature = "webrtc"))]
    fn hardware(config: &CallConfig) -> CallResult<Self> {
        use crate::media::{CpalCaptureBackend, HardwareMediaProvider};
        use crate::peer::WebRtcPeerFactory;

        Ok(Self {
            variant: MediaVariant::Hardware,
            provider: Arc::new(HardwareMediaProvider::new(CpalCaptureBackend::new())),
            peers: Arc::new(WebRtcPeerFactory::new(config.ice.clone())?),
        })
    }

    #[cfg(not(all(feature = "device-cpal", feature = "webrtc")))]
    fn hardware(_config: &CallConfig) -> CallResult<Self> {
        Err(CallError::capability_unavailable(
            "built without the `hardware` feature",
        ))
    }
}

impl fmt::Debug for MediaStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStack")
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

/// What the selector found on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityReport {
    /// Requested mode after environment overrides
    pub mode: MediaMode,
    /// Whether the hardware stack is compiled in
    pub hardware_compiled: bool,
    /// Devices found (all false when not compiled in)
    pub devices: DeviceAvailability,
}

impl CapabilityReport {
    /// Whether the hardware stack can run here
    pub fn hardware_usable(&self) -> bool {
        self.hardware_compiled && self.devices.microphone
    }
}

/// One-time capability check
#[derive(Debug, Clone)]
pub struct EnvironmentCapabilitySelector {
    config: CallConfig,
}

impl EnvironmentCapabilitySelector {
    /// Select according to `config.media_mode` as given
    pub fn new(config: CallConfig) -> Self {
        Self { config }
    }

    /// Select according to `config.media_mode` overridden by the environment
    pub fn from_env(config: CallConfig) -> CallResult<Self> {
        Ok(Self::new(config.apply_env_overrides()?))
    }

    /// Whether the hardware stack was compiled in
    pub fn hardware_compiled() -> bool {
        cfg!(all(feature = "device-cpal", feature = "webrtc"))
    }

    /// Inspect the host without building anything
    pub async fn probe(&self) -> CapabilityReport {
        CapabilityReport {
            mode: self.config.media_mode,
            hardware_compiled: Self::hardware_compiled(),
            devices: probe_devices().await,
        }
    }

    /// Build the media stack for this process
    pub async fn select(&self) -> CallResult<MediaStack> {
        let report = self.probe().await;
        let stack = match report.mode {
            MediaMode::Simulated => MediaStack::simulated(&self.config),
            MediaMode::Hardware => {
                if !report.hardware_usable() {
                    return Err(CallError::capability_unavailable(unusable_reason(&report)));
                }
                MediaStack::hardware(&self.config)?
            }
            MediaMode::Auto if report.hardware_usable() => match MediaStack::hardware(&self.config) {
                Ok(stack) => stack,
                Err(e) => {
                    warn!(error = %e, "hardware stack failed to initialize, using simulated media");
                    MediaStack::simulated(&self.config)
                }
            },
            MediaMode::Auto => MediaStack::simulated(&self.config),
        };

        info!(
            mode = %report.mode,
            hardware_compiled = report.hardware_compiled,
            microphone = report.devices.microphone,
            variant = %stack.variant,
            "media stack selected"
        );
        Ok(stack)
    }
}

fn unusable_reason(report: &CapabilityReport) -> &'static str {
    if !report.hardware_compiled {
        "hardware media requested but built without the `hardware` feature"
    } else {
        "hardware media requested but no microphone is available"
    }
}

#[cfg(feature = "device-cpal")]
async fn probe_devices() -> DeviceAvailability {
    use crate::media::{CaptureBackend, CpalCaptureBackend};
    CpalCaptureBackend::new().probe().await
}

#[cfg(not(feature = "device-cpal"))]
async fn probe_devices() -> DeviceAvailability {
    DeviceAvailability::default()
}
