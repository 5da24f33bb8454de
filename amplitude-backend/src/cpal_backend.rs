//! Worker-thread-owned cpal stream. The public [`CpalAudioBackend`] handle
//! is `Send` and talks to the worker over a control channel so no
//! non-`Send` cpal types ever cross a thread boundary.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::{AudioBackend, BackendError, DiagnosticEvent, DiagnosticsCb, FrameCounter, RenderFn};

pub struct CpalAudioBackend {
    inner: Arc<Inner>,
}

struct Inner {
    sample_rate: u32,
    buffer_size: usize,
    channels: u16,
    device_name: Option<String>,
    render: Mutex<Option<RenderFn>>,
    frames: FrameCounter,
    ctrl_tx: Sender<CtrlMsg>,
}

enum CtrlMsg {
    SetRender(Option<RenderFn>),
    Start,
    Stop,
    SetDiagnostics(Option<DiagnosticsCb>),
    Shutdown,
}

impl CpalAudioBackend {
    pub fn new() -> Result<Self, BackendError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(BackendError::DeviceNotFound)?;
        let device_name = device.name().ok();

        let mut supported_configs = device
            .supported_output_configs()
            .map_err(|e| BackendError::Other(e.to_string()))?
            .collect::<Vec<_>>();

        if supported_configs.is_empty() {
            return Err(BackendError::UnsupportedFormat("no supported configs".into()));
        }

        let chosen = supported_configs
            .iter()
            .rev()
            .find(|c| c.sample_format() == SampleFormat::F32 && c.channels() >= 2)
            .cloned()
            .or_else(|| supported_configs.pop())
            .unwrap();

        let config = chosen.with_max_sample_rate().config();
        let buffer_frames = match config.buffer_size {
            cpal::BufferSize::Fixed(n) => n as usize,
            cpal::BufferSize::Default => 0,
        };

        let (tx, rx) = unbounded::<CtrlMsg>();

        let inner = Arc::new(Inner {
            sample_rate: config.sample_rate.0,
            buffer_size: buffer_frames,
            channels: config.channels as u16,
            device_name,
            render: Mutex::new(None),
            frames: FrameCounter::default(),
            ctrl_tx: tx,
        });

        let worker_inner = inner.clone();
        thread::Builder::new()
            .name("amplitude-cpal-worker".into())
            .spawn(move || worker_loop(device, config, rx, worker_inner))
            .map_err(|e| BackendError::Other(e.to_string()))?;

        Ok(Self { inner })
    }
}

fn worker_loop(device: Device, config: StreamConfig, rx: Receiver<CtrlMsg>, inner: Arc<Inner>) {
    let channels = config.channels as usize;
    let mut diagnostics: Option<DiagnosticsCb> = None;
    let mut stream: Option<cpal::Stream> = None;

    loop {
        while let Ok(msg) = rx.try_recv() {
            match msg {
                CtrlMsg::SetRender(render) => {
                    *inner.render.lock() = render;
                }
                CtrlMsg::Start => {
                    if stream.is_none() {
                        stream = build_stream(&device, &config, channels, &inner, diagnostics.clone());
                    }
                }
                CtrlMsg::Stop => {
                    stream = None;
                }
                CtrlMsg::SetDiagnostics(cb) => {
                    diagnostics = cb;
                }
                CtrlMsg::Shutdown => return,
            }
        }
        thread::sleep(Duration::from_millis(2));
    }
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    channels: usize,
    inner: &Arc<Inner>,
    diagnostics: Option<DiagnosticsCb>,
) -> Option<cpal::Stream> {
    let sample_rate = config.sample_rate.0;
    let cb_inner = inner.clone();

    let err_diagnostics = diagnostics.clone();
    let err_cb = move |err| {
        tracing::warn!(error = %err, "cpal stream error");
        if let Some(cb) = &err_diagnostics {
            let cb = cb.clone();
            thread::spawn(move || cb(DiagnosticEvent::XRun { count: 1 }));
        }
    };

    let data_cb = move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
        let render = cb_inner.render.lock().clone();
        if let Some(render) = render {
            let frames = data.len() / channels;
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                render(data, sample_rate, frames);
            }));
            if result.is_err() {
                data.iter_mut().for_each(|s| *s = 0.0);
            }
        } else {
            data.iter_mut().for_each(|s| *s = 0.0);
        }
        cb_inner.frames.add((data.len() / channels) as u64);
    };

    match device.build_output_stream(config, data_cb, err_cb, None) {
        Ok(s) => match s.play() {
            Ok(()) => Some(s),
            Err(e) => {
                tracing::error!(error = %e, "failed to start cpal stream");
                None
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to build cpal stream");
            if let Some(cb) = diagnostics {
                thread::spawn(move || cb(DiagnosticEvent::Other(format!("stream build failed: {e}"))));
            }
            None
        }
    }
}

impl AudioBackend for CpalAudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError> {
        self.inner
            .ctrl_tx
            .send(CtrlMsg::SetRender(Some(render)))
            .map_err(|_| BackendError::Other("control channel closed".into()))?;
        self.inner
            .ctrl_tx
            .send(CtrlMsg::Start)
            .map_err(|_| BackendError::Other("control channel closed".into()))
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.inner
            .ctrl_tx
            .send(CtrlMsg::Stop)
            .map_err(|_| BackendError::Other("control channel closed".into()))?;
        self.inner
            .ctrl_tx
            .send(CtrlMsg::SetRender(None))
            .map_err(|_| BackendError::Other("control channel closed".into()))
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    fn channels(&self) -> u16 {
        self.inner.channels
    }

    fn frames_since_start(&self) -> u64 {
        self.inner.frames.get()
    }

    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>) {
        self.inner.ctrl_tx.send(CtrlMsg::SetDiagnostics(cb)).ok();
    }

    fn device_name(&self) -> Option<&str> {
        self.inner.device_name.as_deref()
    }
}

impl Drop for CpalAudioBackend {
    fn drop(&mut self) {
        self.inner.ctrl_tx.send(CtrlMsg::Shutdown).ok();
    }
}
