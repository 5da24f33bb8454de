//! The audio device driver boundary: a pull-model render callback invoked
//! from whatever thread the platform audio API schedules.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(not(feature = "mock-audio"))]
pub mod cpal_backend;
#[cfg(feature = "mock-audio")]
pub mod mock_backend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no audio output device available")]
    DeviceNotFound,
    #[error("unsupported stream format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to create audio stream")]
    StreamCreationFailed,
    #[error("playback error: {0}")]
    PlaybackError(String),
    #[error("{0}")]
    Other(String),
}

/// Render callback invoked from the backend's real-time thread. Writes
/// interleaved `f32` samples into `data` (`frames * channels` long) for
/// the given sample rate and frame count. Must not block or allocate.
pub type RenderFn = Arc<dyn Fn(&mut [f32], u32, usize) + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    XRun { count: u32 },
    DeviceRemoved,
    BufferSizeChanged { frames: usize },
    Other(String),
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::XRun { count } => write!(f, "XRun(count={count})"),
            DiagnosticEvent::DeviceRemoved => write!(f, "DeviceRemoved"),
            DiagnosticEvent::BufferSizeChanged { frames } => write!(f, "BufferSizeChanged(frames={frames})"),
            DiagnosticEvent::Other(s) => write!(f, "Other({s})"),
        }
    }
}

/// Non-realtime diagnostics callback (XRuns, device changes, errors).
pub type DiagnosticsCb = Arc<dyn Fn(DiagnosticEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub channels: u16,
    pub device_name: Option<String>,
}

pub trait AudioBackend: Send {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError>;
    fn stop(&mut self) -> Result<(), BackendError>;
    fn sample_rate(&self) -> u32;
    fn buffer_size(&self) -> usize;
    fn channels(&self) -> u16;
    fn frames_since_start(&self) -> u64;
    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>);
    fn device_name(&self) -> Option<&str>;
}

/// Shared counter used by both backend implementations to report
/// `frames_since_start` without locking.
#[derive(Default)]
pub(crate) struct FrameCounter(AtomicU64);

impl FrameCounter {
    pub(crate) fn add(&self, frames: u64) {
        self.0.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(not(feature = "mock-audio"))]
pub fn create_audio_backend() -> Result<Box<dyn AudioBackend>, BackendError> {
    let backend = cpal_backend::CpalAudioBackend::new()?;
    tracing::info!(
        sample_rate = backend.sample_rate(),
        buffer_size = backend.buffer_size(),
        channels = backend.channels(),
        device = backend.device_name().unwrap_or("<unknown>"),
        "opened audio backend"
    );
    Ok(Box::new(backend))
}

#[cfg(feature = "mock-audio")]
pub fn create_audio_backend() -> Result<Box<dyn AudioBackend>, BackendError> {
    let backend = mock_backend::MockAudioBackend::new();
    tracing::info!(
        sample_rate = backend.sample_rate(),
        channels = backend.channels(),
        "opened mock audio backend"
    );
    Ok(Box::new(backend))
}

pub fn is_mock_backend_enabled() -> bool {
    cfg!(feature = "mock-audio")
}
