//! Simulated media provider
//!
//! Hands out synthetic stream handles with the same signatures and async
//! timing as the hardware provider, so the state machine runs unchanged on
//! hosts without devices. Acquisition/release counters make resource
//! discipline observable in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{MediaCapabilityProvider, MediaVariant};
use crate::error::{CallError, CallResult};
use crate::types::{CameraFacing, MediaStream};

#[derive(Debug)]
struct State {
    stream: Option<MediaStream>,
    muted: bool,
    video_off: bool,
    facing: CameraFacing,
}

/// Synthetic capture provider
#[derive(Debug)]
pub struct SimulatedMediaProvider {
    state: Mutex<State>,
    acquire_delay: Duration,
    acquire_count: AtomicUsize,
    release_count: AtomicUsize,
}

impl SimulatedMediaProvider {
    /// Create a provider that takes `acquire_delay` to hand out a stream
    pub fn new(acquire_delay: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                stream: None,
                muted: false,
                video_off: true,
                facing: CameraFacing::Front,
            }),
            acquire_delay,
            acquire_count: AtomicUsize::new(0),
            release_count: AtomicUsize::new(0),
        }
    }

    /// Number of successful acquisitions
    pub fn acquire_count(&self) -> usize {
        self.acquire_count.load(Ordering::SeqCst)
    }

    /// Number of releases that actually released a stream
    pub fn release_count(&self) -> usize {
        self.release_count.load(Ordering::SeqCst)
    }

    /// Camera currently selected
    pub fn facing(&self) -> CameraFacing {
        self.state.lock().facing
    }

    fn release_held(&self, state: &mut State) {
        if let Some(stream) = state.stream.take() {
            self.release_count.fetch_add(1, Ordering::SeqCst);
            debug!(stream_id = %stream.id, "simulated local stream released");
        }
    }
}

impl Default for SimulatedMediaProvider {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl MediaCapabilityProvider for SimulatedMediaProvider {
    fn variant(&self) -> MediaVariant {
        MediaVariant::Simulated
    }

    async fn acquire_local_stream(&self, wants_video: bool) -> CallResult<MediaStream> {
        {
            let mut state = self.state.lock();
            self.release_held(&mut state);
        }

        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }

        let stream = MediaStream::local(wants_video, "simulated-capture");
        let mut state = self.state.lock();
        if state.stream.is_some() {
            // A concurrent acquire won the race; keep the invariant of one stream
            return Err(CallError::internal("local stream acquired concurrently"));
        }
        state.stream = Some(stream.clone());
        state.muted = false;
        state.video_off = !wants_video;
        state.facing = CameraFacing::Front;
        self.acquire_count.fetch_add(1, Ordering::SeqCst);
        debug!(stream_id = %stream.id, wants_video, "simulated local stream acquired");
        Ok(stream)
    }

    async fn release_local_stream(&self) {
        let mut state = self.state.lock();
        self.release_held(&mut state);
    }

    fn has_local_stream(&self) -> bool {
        self.state.lock().stream.is_some()
    }

    async fn toggle_mute(&self) -> bool {
        let mut state = self.state.lock();
        if state.stream.is_some() {
            state.muted = !state.muted;
        }
        state.muted
    }

    async fn toggle_video(&self) -> bool {
        let mut state = self.state.lock();
        let has_video = state.stream.as_ref().is_some_and(|s| s.has_video);
        if has_video {
            state.video_off = !state.video_off;
        }
        state.video_off
    }

    async fn switch_camera(&self) -> CallResult<CameraFacing> {
        let mut state = self.state.lock();
        match &state.stream {
            Some(stream) if stream.has_video => {
                state.facing = state.facing.flipped();
                Ok(state.facing)
            }
            Some(_) => Err(CallError::capability_unavailable("voice call has no camera")),
            None => Err(CallError::capability_unavailable("no local stream")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reacquire_releases_previous_stream() {
        let provider = SimulatedMediaProvider::default();
        let first = provider.acquire_local_stream(false).await.unwrap();
        let second = provider.acquire_local_stream(true).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(provider.acquire_count(), 2);
        assert_eq!(provider.release_count(), 1);
        assert!(provider.has_local_stream());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let provider = SimulatedMediaProvider::default();
        provider.acquire_local_stream(false).await.unwrap();
        provider.release_local_stream().await;
        provider.release_local_stream().await;
        assert_eq!(provider.release_count(), 1);
        assert!(!provider.has_local_stream());
    }

    #[tokio::test]
    async fn test_toggles_without_stream_keep_last_state() {
        let provider = SimulatedMediaProvider::default();
        assert!(!provider.toggle_mute().await);
        assert!(provider.toggle_video().await);
        assert!(provider.switch_camera().await.is_err());
    }

    #[tokio::test]
    async fn test_video_controls() {
        let provider = SimulatedMediaProvider::default();
        provider.acquire_local_stream(true).await.unwrap();

        assert!(provider.toggle_mute().await);
        assert!(!provider.toggle_mute().await);
        assert!(provider.toggle_video().await);
        assert!(!provider.toggle_video().await);
        assert_eq!(provider.switch_camera().await.unwrap(), CameraFacing::Back);
        assert_eq!(provider.facing(), CameraFacing::Back);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_honours_delay() {
        let provider = SimulatedMediaProvider::new(Duration::from_millis(100));
        let start = tokio::time::Instant::now();
        provider.acquire_local_stream(false).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
