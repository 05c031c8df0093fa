//! Capture processor — the only capture code that runs on the device thread.
//!
//! Each device callback is split into fixed-capacity blocks and pushed into
//! a wait-free SPSC ring (`rtrb`). The processor never allocates, logs or
//! blocks: a full ring costs one atomic increment and the block is lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::dsp::graph::RENDER_QUANTUM;

/// Frame capacity of one [`SampleBlock`].
pub const BLOCK_FRAMES: usize = RENDER_QUANTUM;

/// Up to one render quantum of mono samples, stored inline.
#[derive(Clone, Copy)]
pub struct SampleBlock {
    samples: [f32; BLOCK_FRAMES],
    len: usize,
}

impl SampleBlock {
    pub const EMPTY: SampleBlock = SampleBlock {
        samples: [0.0; BLOCK_FRAMES],
        len: 0,
    };

    /// Copy at most [`BLOCK_FRAMES`] samples from `data`.
    pub fn from_slice(data: &[f32]) -> Self {
        let mut block = Self::EMPTY;
        let len = data.len().min(BLOCK_FRAMES);
        block.samples[..len].copy_from_slice(&data[..len]);
        block.len = len;
        block
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for SampleBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBlock").field("len", &self.len).finish()
    }
}

impl Default for SampleBlock {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Device-side half of a capture unit.
pub struct CaptureProcessor {
    recording: Arc<AtomicBool>,
    producer: rtrb::Producer<SampleBlock>,
    overruns: Arc<AtomicU64>,
}

impl CaptureProcessor {
    pub(crate) fn new(
        recording: Arc<AtomicBool>,
        producer: rtrb::Producer<SampleBlock>,
        overruns: Arc<AtomicU64>,
    ) -> Self {
        CaptureProcessor {
            recording,
            producer,
            overruns,
        }
    }

    /// Forward channel 0 of an interleaved f32 callback.
    pub fn process_interleaved(&mut self, data: &[f32], channels: usize) {
        self.process_with(data, channels, |s| s);
    }

    /// Forward channel 0 of an interleaved callback in any sample type.
    pub fn process_with<T: Copy>(&mut self, data: &[T], channels: usize, to_f32: impl Fn(T) -> f32) {
        let channels = channels.max(1);
        for chunk in data.chunks(BLOCK_FRAMES * channels) {
            if !self.recording.load(Ordering::Acquire) {
                return;
            }
            let mut block = SampleBlock::EMPTY;
            for (slot, frame) in block.samples.iter_mut().zip(chunk.chunks_exact(channels)) {
                *slot = to_f32(frame[0]);
                block.len += 1;
            }
            if block.len == 0 {
                continue;
            }
            if self.producer.push(block).is_err() {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(capacity: usize) -> (CaptureProcessor, rtrb::Consumer<SampleBlock>, Arc<AtomicBool>, Arc<AtomicU64>) {
        let (tx, rx) = rtrb::RingBuffer::new(capacity);
        let flag = Arc::new(AtomicBool::new(true));
        let overruns = Arc::new(AtomicU64::new(0));
        (CaptureProcessor::new(flag.clone(), tx, overruns.clone()), rx, flag, overruns)
    }

    #[test]
    fn splits_callbacks_into_blocks() {
        let (mut p, mut rx, _, _) = processor(8);
        let data: Vec<f32> = (0..300).map(|i| i as f32).collect();
        p.process_interleaved(&data, 1);
        let lens: Vec<usize> = std::iter::from_fn(|| rx.pop().ok()).map(|b| b.len()).collect();
        assert_eq!(lens, vec![128, 128, 44]);
    }

    #[test]
    fn takes_first_channel_only() {
        let (mut p, mut rx, _, _) = processor(4);
        p.process_interleaved(&[0.1, 9.0, 0.2, 9.0, 0.3, 9.0], 2);
        assert_eq!(rx.pop().unwrap().as_slice(), &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn converts_integer_samples() {
        let (mut p, mut rx, _, _) = processor(4);
        p.process_with(&[16384i16, -32768], 1, |s| s as f32 / 32768.0);
        assert_eq!(rx.pop().unwrap().as_slice(), &[0.5, -1.0]);
    }

    #[test]
    fn silent_while_not_recording() {
        let (mut p, mut rx, flag, _) = processor(4);
        flag.store(false, Ordering::Release);
        p.process_interleaved(&[1.0; 64], 1);
        assert!(rx.pop().is_err());
    }

    #[test]
    fn stop_mid_callback_drops_remaining_blocks() {
        let (mut p, mut rx, flag, _) = processor(8);
        let stopper = flag.clone();
        p.process_with(&vec![0.5f32; BLOCK_FRAMES * 3], 1, |s| {
            stopper.store(false, Ordering::Release);
            s
        });
        assert_eq!(rx.pop().unwrap().len(), BLOCK_FRAMES);
        assert!(rx.pop().is_err());
    }

    #[test]
    fn full_ring_counts_overruns() {
        let (mut p, mut rx, _, overruns) = processor(2);
        p.process_interleaved(&vec![0.5; BLOCK_FRAMES * 5], 1);
        assert_eq!(overruns.load(Ordering::Relaxed), 3);
        assert_eq!(rx.pop().unwrap().len(), BLOCK_FRAMES);
    }

    #[test]
    fn from_slice_truncates() {
        let block = SampleBlock::from_slice(&[0.25; BLOCK_FRAMES + 10]);
        assert_eq!(block.len(), BLOCK_FRAMES);
        assert!(SampleBlock::default().is_empty());
    }
}
