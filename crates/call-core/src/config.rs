//! Call manager configuration
//!
//! [`CallConfig`] is plain serde data, loadable from TOML and adjustable with
//! `with_*` builder methods. Every section has defaults, so an empty file is a
//! valid configuration.
//!
//! ```rust
//! use rtcall_call_core::config::{BusyPolicy, CallConfig, MediaMode};
//!
//! let config = CallConfig::from_toml_str(r#"
//!     media_mode = "simulated"
//!     busy_policy = "auto_decline"
//!
//!     [simulated]
//!     connect_delay_ms = 50
//! "#).unwrap();
//!
//! assert_eq!(config.media_mode, MediaMode::Simulated);
//! assert_eq!(config.busy_policy, BusyPolicy::AutoDecline);
//! assert_eq!(config.simulated.connect_delay_ms, 50);
//! assert_eq!(config.timeouts.ring_timeout_secs, 45);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CallError, CallResult};
use crate::types::CallerIdentity;

/// Environment variable that overrides [`CallConfig::media_mode`]
pub const MEDIA_MODE_ENV: &str = "RTCALL_MEDIA_MODE";

/// Which media stack to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    /// Hardware when the host has it, simulated otherwise
    Auto,
    /// Real devices and negotiation engine; fail if unavailable
    Hardware,
    /// Synthetic media with identical interface behaviour
    Simulated,
}

impl FromStr for MediaMode {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "hardware" | "real" => Ok(Self::Hardware),
            "simulated" | "mock" => Ok(Self::Simulated),
            other => Err(CallError::config(format!("unknown media mode '{}'", other))),
        }
    }
}

impl fmt::Display for MediaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Hardware => "hardware",
            Self::Simulated => "simulated",
        };
        f.write_str(s)
    }
}

/// What to do with an invite that arrives while another call is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Keep it as a waiting call and notify the UI; offer it once the current call ends
    QueueAndNotify,
    /// Decline it immediately with reason `busy`
    AutoDecline,
}

/// Timing of the simulated media stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Delay before a local stream is handed out
    pub acquire_delay_ms: u64,
    /// Delay between both descriptions being present and `Connected`
    pub connect_delay_ms: u64,
    /// Delay between `Connected` and the remote stream appearing
    pub remote_stream_delay_ms: u64,
    /// Number of synthetic local ICE candidates to trickle
    pub local_candidates: usize,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            acquire_delay_ms: 20,
            connect_delay_ms: 300,
            remote_stream_delay_ms: 200,
            local_candidates: 2,
        }
    }
}

/// Call timers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long an incoming call rings before it is treated as missed
    pub ring_timeout_secs: u64,
    /// How long Dialing/Connecting may last before the call is abandoned
    pub negotiation_timeout_secs: u64,
    /// Upper bound for a single call-record service request
    pub record_request_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 45,
            negotiation_timeout_secs: 30,
            record_request_timeout_ms: 5_000,
        }
    }
}

/// ICE settings for the hardware negotiation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    /// STUN/TURN server URLs
    pub servers: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// Top-level configuration for the call session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Media stack selection
    pub media_mode: MediaMode,
    /// Handling of invites while busy
    pub busy_policy: BusyPolicy,
    /// Send an `incoming_call` invite ahead of the offer
    ///
    /// Turn off when the backend pushes invites itself.
    pub announce_invites: bool,
    /// Panic on invalid state transitions instead of logging them
    pub strict_transitions: bool,
    /// Capacity of the broadcast event stream
    pub event_channel_capacity: usize,
    /// Identity announced in outgoing invites
    pub local_identity: CallerIdentity,
    /// Simulated stack timing
    pub simulated: SimulatedConfig,
    /// Call timers
    pub timeouts: TimeoutConfig,
    /// ICE servers
    pub ice: IceConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            media_mode: MediaMode::Auto,
            busy_policy: BusyPolicy::QueueAndNotify,
            announce_invites: true,
            strict_transitions: false,
            event_channel_capacity: 256,
            local_identity: CallerIdentity::new("local", "Me"),
            simulated: SimulatedConfig::default(),
            timeouts: TimeoutConfig::default(),
            ice: IceConfig::default(),
        }
    }
}

impl CallConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> CallResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| CallError::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> CallResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CallError::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "loaded call configuration");
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> CallResult<String> {
        toml::to_string_pretty(self).map_err(|e| CallError::config(e.to_string()))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(mut self) -> CallResult<Self> {
        if let Ok(mode) = std::env::var(MEDIA_MODE_ENV) {
            self.media_mode = mode.parse()?;
            info!(media_mode = %self.media_mode, "media mode overridden from {}", MEDIA_MODE_ENV);
        }
        Ok(self)
    }

    /// Check value ranges
    pub fn validate(&self) -> CallResult<()> {
        if self.event_channel_capacity == 0 {
            return Err(CallError::config("event_channel_capacity must be at least 1"));
        }
        if self.timeouts.ring_timeout_secs == 0 {
            return Err(CallError::config("timeouts.ring_timeout_secs must be at least 1"));
        }
        if self.timeouts.negotiation_timeout_secs == 0 {
            return Err(CallError::config("timeouts.negotiation_timeout_secs must be at least 1"));
        }
        if self.local_identity.id.is_empty() {
            return Err(CallError::config("local_identity.id must not be empty"));
        }
        Ok(())
    }

    /// Set the announced local identity
    pub fn with_local_identity(mut self, identity: CallerIdentity) -> Self {
        self.local_identity = identity;
        self
    }

    /// Set the media mode
    pub fn with_media_mode(mut self, mode: MediaMode) -> Self {
        self.media_mode = mode;
        self
    }

    /// Set the busy policy
    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    /// Enable or disable invite announcements
    pub fn with_announce_invites(mut self, announce: bool) -> Self {
        self.announce_invites = announce;
        self
    }

    /// Panic on invalid transitions
    pub fn with_strict_transitions(mut self, strict: bool) -> Self {
        self.strict_transitions = strict;
        self
    }

    /// Replace the simulated stack timing
    pub fn with_simulated(mut self, simulated: SimulatedConfig) -> Self {
        self.simulated = simulated;
        self
    }

    /// Replace the timers
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Ring timeout as a [`Duration`]
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.ring_timeout_secs)
    }

    /// Negotiation timeout as a [`Duration`]
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.negotiation_timeout_secs)
    }

    /// Call-record request timeout as a [`Duration`]
    pub fn record_request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.record_request_timeout_ms)
    }
}
