//! cpal microphone backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use super::{CaptureError, CaptureProcessor, InputDevice, InputStream};

/// The host's default input device, or one picked by name.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    pub fn default_device() -> Self {
        CpalInput { device_name: None }
    }

    pub fn named(name: impl Into<String>) -> Self {
        CpalInput {
            device_name: Some(name.into()),
        }
    }

    fn resolve(&self) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_input_device()
                .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".into())),
            Some(name) => host
                .input_devices()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| &n == name))
                .ok_or_else(|| CaptureError::DeviceUnavailable(format!("input device not found: {name}"))),
        }
    }
}

pub struct CpalStream {
    _stream: cpal::Stream,
    sample_rate: u32,
    alive: Arc<AtomicBool>,
}

impl InputStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Backends report a refused microphone as a backend-specific error.
fn classify(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}

impl InputDevice for CpalInput {
    fn open(&mut self, mut processor: CaptureProcessor) -> Result<Box<dyn InputStream>, CaptureError> {
        let device = self.resolve()?;
        let supported = device
            .default_input_config()
            .map_err(|e| classify(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        let alive = Arc::new(AtomicBool::new(true));
        let err_alive = Arc::clone(&alive);
        let err_fn = move |err: cpal::StreamError| {
            log::error!("input stream error: {err}");
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                err_alive.store(false, Ordering::Release);
            }
        };

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    processor.process_interleaved(data, channels)
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    processor.process_with(data, channels, |s| s as f32 / 32768.0)
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    processor.process_with(data, channels, |s| (s as f32 - 32768.0) / 32768.0)
                },
                err_fn,
                None,
            ),
            other => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "unsupported input sample format: {other:?}"
                )));
            }
        }
        .map_err(|e| classify(e.to_string()))?;

        stream.play().map_err(|e| classify(e.to_string()))?;
        log::debug!("cpal input: {channels} channel(s) @ {sample_rate} Hz, {sample_format:?}");

        Ok(Box::new(CpalStream {
            _stream: stream,
            sample_rate,
            alive,
        }))
    }
}
