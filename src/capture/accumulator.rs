//! Sample accumulator — joins captured blocks into one mono take.

use super::CaptureError;
use super::processor::SampleBlock;
use crate::buffer::AudioSampleBuffer;

/// Arrival-ordered, lossless concatenation of capture blocks.
#[derive(Debug, Clone, Default)]
pub struct SampleAccumulator {
    samples: Vec<f32>,
    blocks: usize,
    sample_rate: u32,
}

impl SampleAccumulator {
    pub fn new(sample_rate: u32) -> Self {
        SampleAccumulator {
            samples: Vec::new(),
            blocks: 0,
            sample_rate,
        }
    }

    /// Forget everything and start a take at `sample_rate`.
    pub fn reset(&mut self, sample_rate: u32) {
        self.samples.clear();
        self.blocks = 0;
        self.sample_rate = sample_rate;
    }

    pub fn append(&mut self, block: &SampleBlock) {
        self.samples.extend_from_slice(block.as_slice());
        self.blocks += 1;
    }

    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Samples gathered so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Copy the take out as one contiguous buffer.
    pub fn finalize(&self) -> Result<AudioSampleBuffer, CaptureError> {
        if self.blocks == 0 || self.samples.is_empty() {
            return Err(CaptureError::EmptyCapture);
        }
        Ok(AudioSampleBuffer::mono(self.samples.clone(), self.sample_rate))
    }
}
