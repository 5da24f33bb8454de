//! A non-hardware backend for tests and headless runs: no `cpal` device is
//! opened, but [`MockAudioBackend::pump`] lets a test drive the render
//! callback the same way a real output stream would.

use parking_lot::Mutex;

use crate::{AudioBackend, BackendError, DiagnosticsCb, FrameCounter, RenderFn};

pub struct MockAudioBackend {
    sample_rate: u32,
    buffer_size: usize,
    channels: u16,
    render: Mutex<Option<RenderFn>>,
    frames: FrameCounter,
    diagnostics: Mutex<Option<DiagnosticsCb>>,
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 256,
            channels: 2,
            render: Mutex::new(None),
            frames: FrameCounter::default(),
            diagnostics: Mutex::new(None),
        }
    }

    pub fn with_format(sample_rate: u32, buffer_size: usize, channels: u16) -> Self {
        Self {
            sample_rate,
            buffer_size,
            channels,
            render: Mutex::new(None),
            frames: FrameCounter::default(),
            diagnostics: Mutex::new(None),
        }
    }

    /// Invokes the current render callback once over `data`, as a real
    /// backend's I/O thread would. No-op if no render callback is set.
    pub fn pump(&self, data: &mut [f32]) {
        let render = self.render.lock().clone();
        if let Some(render) = render {
            let frames = data.len() / self.channels.max(1) as usize;
            render(data, self.sample_rate, frames);
            self.frames.add(frames as u64);
        }
    }
}

impl Default for MockAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockAudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError> {
        *self.render.lock() = Some(render);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        *self.render.lock() = None;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn frames_since_start(&self) -> u64 {
        self.frames.get()
    }

    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>) {
        *self.diagnostics.lock() = cb;
    }

    fn device_name(&self) -> Option<&str> {
        Some("mock-device")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pump_without_render_is_a_no_op() {
        let backend = MockAudioBackend::new();
        let mut data = vec![1.0f32; 32];
        backend.pump(&mut data);
        assert_eq!(backend.frames_since_start(), 0);
    }

    #[test]
    fn pump_invokes_render_and_advances_frame_count() {
        let mut backend = MockAudioBackend::new();
        backend
            .start(Arc::new(|data: &mut [f32], _rate, _frames| {
                data.iter_mut().for_each(|s| *s = 0.5);
            }))
            .unwrap();
        let mut data = vec![0.0f32; 64];
        backend.pump(&mut data);
        assert!(data.iter().all(|&s| s == 0.5));
        assert_eq!(backend.frames_since_start(), 32);
    }
}
