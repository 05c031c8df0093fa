//! Capture Unit — microphone input through a real-time processor into a block ring.
//!
//! ```text
//!   device thread                         main side
//!  ┌────────────────────┐   rtrb ring   ┌───────────────────────┐
//!  │ CaptureProcessor   │──push()──────►│ CaptureUnit::drain_*  │──► SampleAccumulator
//!  │ (reads is_recording│               │ (polled by session)   │
//!  │  once per block)   │               └───────────────────────┘
//!  └────────────────────┘
//! ```
//!
//! `start()` opens the device on first use and raises the recording flag;
//! `stop()` lowers it but keeps the stream open so the next take starts
//! without renegotiating the device. Blocks already in the ring when
//! capture stops are still delivered by the next drain. Blocks lost to a
//! full ring are counted; the session rejects a take with any loss.

pub mod accumulator;
pub mod processor;

#[cfg(feature = "device")]
pub mod cpal_input;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use thiserror::Error;

pub use accumulator::SampleAccumulator;
pub use processor::{BLOCK_FRAMES, CaptureProcessor, SampleBlock};

/// Default ring capacity in blocks (about 12 s at 44.1 kHz).
pub const DEFAULT_RING_BLOCKS: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("nothing was captured")]
    EmptyCapture,

    #[error("capture ring overflowed: {lost} block(s) lost")]
    Overrun { lost: u64 },
}

/// A running input stream. Dropping it releases the device.
pub trait InputStream {
    /// Native rate of the stream, fixed for its lifetime.
    fn sample_rate(&self) -> u32;

    /// `false` once the platform has ended the stream.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Something that can open a microphone stream feeding a processor.
pub trait InputDevice {
    fn open(&mut self, processor: CaptureProcessor) -> Result<Box<dyn InputStream>, CaptureError>;
}

/// Main-side owner of one input stream and its block ring.
pub struct CaptureUnit<D: InputDevice> {
    device: D,
    stream: Option<Box<dyn InputStream>>,
    consumer: Option<rtrb::Consumer<SampleBlock>>,
    recording: Arc<AtomicBool>,
    overruns: Arc<AtomicU64>,
    ring_blocks: usize,
}

impl<D: InputDevice> CaptureUnit<D> {
    pub fn new(device: D, ring_blocks: usize) -> Self {
        CaptureUnit {
            device,
            stream: None,
            consumer: None,
            recording: Arc::new(AtomicBool::new(false)),
            overruns: Arc::new(AtomicU64::new(0)),
            ring_blocks: ring_blocks.max(1),
        }
    }

    /// Begin emitting blocks. Returns the stream's sample rate.
    pub fn start(&mut self) -> Result<u32, CaptureError> {
        if self.stream.as_ref().is_some_and(|s| !s.is_alive()) {
            log::warn!("input stream ended; reopening device");
            self.release();
        }

        if self.stream.is_none() {
            let (producer, consumer) = rtrb::RingBuffer::new(self.ring_blocks);
            let processor = CaptureProcessor::new(
                Arc::clone(&self.recording),
                producer,
                Arc::clone(&self.overruns),
            );
            let stream = self.device.open(processor)?;
            log::info!("input stream opened at {} Hz", stream.sample_rate());
            self.stream = Some(stream);
            self.consumer = Some(consumer);
        } else if let Some(consumer) = self.consumer.as_mut() {
            let stale = std::iter::from_fn(|| consumer.pop().ok()).count();
            if stale > 0 {
                log::debug!("discarded {stale} stale capture block(s)");
            }
        }

        self.overruns.store(0, Ordering::Relaxed);
        self.recording.store(true, Ordering::Release);
        log::info!("capture started");
        Ok(self.sample_rate().unwrap_or_default())
    }

    /// Halt emission. The stream stays open.
    pub fn stop(&mut self) {
        if !self.recording.swap(false, Ordering::AcqRel) {
            return;
        }
        let overruns = self.overruns();
        if overruns > 0 {
            log::warn!("capture ring overflowed: {overruns} block(s) lost");
        }
        log::info!("capture stopped");
    }

    /// Move every block waiting in the ring into `accumulator`.
    pub fn drain_into(&mut self, accumulator: &mut SampleAccumulator) -> usize {
        let Some(consumer) = self.consumer.as_mut() else {
            return 0;
        };
        let mut moved = 0;
        while let Ok(block) = consumer.pop() {
            accumulator.append(&block);
            moved += 1;
        }
        moved
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.stream.as_ref().map(|s| s.sample_rate())
    }

    /// Blocks lost to a full ring since the last `start()`.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Close the stream and drop the ring.
    pub fn release(&mut self) {
        self.recording.store(false, Ordering::Release);
        if self.stream.take().is_some() {
            log::info!("input stream released");
        }
        self.consumer = None;
    }
}

impl<D: InputDevice> Drop for CaptureUnit<D> {
    fn drop(&mut self) {
        self.release();
    }
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedDevice;
    use super::*;

    #[test]
    fn start_reports_stream_rate() {
        let (device, _feed) = ScriptedDevice::new(48000);
        let mut unit = CaptureUnit::new(device, 16);
        assert_eq!(unit.start().unwrap(), 48000);
        assert!(unit.is_recording());
        assert!(unit.is_open());
    }

    #[test]
    fn device_errors_surface() {
        let mut unit = CaptureUnit::new(
            ScriptedDevice::failing(CaptureError::PermissionDenied("blocked".into())),
            16,
        );
        assert_eq!(
            unit.start().unwrap_err(),
            CaptureError::PermissionDenied("blocked".into())
        );
        assert!(!unit.is_recording());
    }

    #[test]
    fn blocks_flow_only_while_recording() {
        let (device, feed) = ScriptedDevice::new(8000);
        let mut unit = CaptureUnit::new(device, 16);
        let mut acc = SampleAccumulator::new(8000);

        unit.start().unwrap();
        feed.callback(&[0.1; 200], 1);
        unit.stop();
        feed.callback(&[0.9; 200], 1);

        // Blocks in flight at stop are still delivered.
        assert_eq!(unit.drain_into(&mut acc), 2);
        assert_eq!(acc.len(), 200);
        assert!(acc.finalize().unwrap().channel(0).unwrap().iter().all(|&s| s == 0.1));
    }

    #[test]
    fn restart_reuses_stream_and_drops_stale_blocks() {
        let (device, feed) = ScriptedDevice::new(8000);
        let mut unit = CaptureUnit::new(device, 16);
        unit.start().unwrap();
        feed.callback(&[0.1; 64], 1);
        unit.stop();
        unit.start().unwrap();
        feed.callback(&[0.2; 32], 1);

        let mut acc = SampleAccumulator::new(8000);
        unit.drain_into(&mut acc);
        assert_eq!(acc.finalize().unwrap().channel(0).unwrap(), &[0.2; 32][..]);
        assert_eq!(unit.device.opened, 1);
    }

    #[test]
    fn ended_stream_is_reopened() {
        let (device, feed) = ScriptedDevice::new(8000);
        let mut unit = CaptureUnit::new(device, 16);
        unit.start().unwrap();
        feed.end();
        feed.callback(&[0.5; 10], 1);
        unit.stop();
        unit.start().unwrap();
        assert_eq!(unit.device.opened, 2);
    }

    #[test]
    fn overruns_are_counted_and_reset() {
        let (device, feed) = ScriptedDevice::new(8000);
        let mut unit = CaptureUnit::new(device, 2);
        unit.start().unwrap();
        feed.callback(&vec![0.0; BLOCK_FRAMES * 4], 1);
        assert_eq!(unit.overruns(), 2);
        unit.stop();
        unit.start().unwrap();
        assert_eq!(unit.overruns(), 0);
    }

    #[test]
    fn release_closes_stream() {
        let (device, _feed) = ScriptedDevice::new(8000);
        let mut unit = CaptureUnit::new(device, 4);
        unit.start().unwrap();
        unit.release();
        assert!(!unit.is_open());
        assert!(!unit.is_recording());
        assert_eq!(unit.sample_rate(), None);
    }
}
