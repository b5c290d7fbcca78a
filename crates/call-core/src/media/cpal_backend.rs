//! CPAL microphone backend
//!
//! Opens the default input device through CPAL. CPAL streams are not `Send`,
//! so each open microphone owns a dedicated thread that builds, plays and
//! finally drops the stream when told to stop. CPAL has no camera support;
//! video calls on this backend fail with a capability error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::hardware::{CaptureBackend, CaptureHandle, DeviceAvailability};
use crate::error::{CallError, CallResult};
use crate::types::CameraFacing;

/// Microphone capture via the default CPAL host
#[derive(Debug, Default)]
pub struct CpalCaptureBackend;

impl CpalCaptureBackend {
    /// Create a backend on the default host
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureBackend for CpalCaptureBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    async fn probe(&self) -> DeviceAvailability {
        let microphone = tokio::task::spawn_blocking(|| {
            cpal::default_host().default_input_device().is_some()
        })
        .await
        .unwrap_or(false);
        DeviceAvailability {
            microphone,
            cameras: 0,
        }
    }

    async fn open_microphone(&self) -> CallResult<Box<dyn CaptureHandle>> {
        let handle = tokio::task::spawn_blocking(CpalMicrophone::open)
            .await
            .map_err(|e| CallError::internal(format!("capture thread join failed: {}", e)))??;
        Ok(Box::new(handle))
    }

    async fn open_camera(&self, _facing: CameraFacing) -> CallResult<Box<dyn CaptureHandle>> {
        Err(CallError::capability_unavailable(
            "camera capture is not supported by the cpal backend",
        ))
    }
}

/// An open CPAL input stream
struct CpalMicrophone {
    name: String,
    enabled: Arc<AtomicBool>,
    peak: Arc<AtomicU32>,
    shutdown_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CpalMicrophone {
    fn open() -> CallResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CallError::capability_unavailable("no input device"))?;
        let name = device.name().unwrap_or_else(|_| "microphone".to_string());
        let supported = device.default_input_config().map_err(|e| {
            CallError::capability_unavailable(format!("input device not usable: {}", e))
        })?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();

        let enabled = Arc::new(AtomicBool::new(true));
        let peak = Arc::new(AtomicU32::new(0));
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<CallResult<()>>();

        let thread_enabled = enabled.clone();
        let thread_peak = peak.clone();
        let thread_name = name.clone();
        std::thread::Builder::new()
            .name("rtcall-capture".into())
            .spawn(move || {
                let stream = match build_stream(&device, &config, sample_format, thread_enabled, thread_peak) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CallError::capability_unavailable(format!(
                        "failed to start input stream: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop() or the handle is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!(device = %thread_name, "cpal input stream closed");
            })
            .map_err(|e| CallError::internal(format!("failed to spawn capture thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| CallError::internal("capture thread exited before reporting"))??;

        info!(device = %name, "cpal microphone opened");
        Ok(Self {
            name,
            enabled,
            peak,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        })
    }

    /// Peak input level of the last buffer, 0.0..=1.0
    fn peak_level(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    enabled: Arc<AtomicBool>,
    peak: Arc<AtomicU32>,
) -> CallResult<cpal::Stream> {
    let on_error = |err: cpal::StreamError| error!("audio capture error: {}", err);
    let result = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let level = if enabled.load(Ordering::Relaxed) {
                    data.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
                } else {
                    0.0
                };
                peak.store(level.to_bits(), Ordering::Relaxed);
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let level = if enabled.load(Ordering::Relaxed) {
                    data.iter()
                        .fold(0.0f32, |acc, s| acc.max((*s as f32 / i16::MAX as f32).abs()))
                } else {
                    0.0
                };
                peak.store(level.to_bits(), Ordering::Relaxed);
            },
            on_error,
            None,
        ),
        other => {
            return Err(CallError::capability_unavailable(format!(
                "unsupported sample format {:?}",
                other
            )));
        }
    };
    result.map_err(|e| CallError::capability_unavailable(format!("failed to build input stream: {}", e)))
}

impl CaptureHandle for CpalMicrophone {
    fn label(&self) -> String {
        self.name.clone()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        debug!(device = %self.name, enabled, peak = self.peak_level(), "microphone toggled");
    }

    fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            if tx.send(()).is_err() {
                warn!(device = %self.name, "capture thread already gone");
            }
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
