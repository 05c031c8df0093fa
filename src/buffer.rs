//! Sample buffers — planar f32 audio tagged with its sample rate.

use thiserror::Error;

/// Errors raised when assembling a buffer from raw channel data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("a buffer needs at least one channel")]
    NoChannels,

    #[error("channel {index} has {len} samples, expected {expected}")]
    RaggedChannels {
        index: usize,
        len: usize,
        expected: usize,
    },

    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
}

/// A block of planar audio: one `Vec<f32>` per channel, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioSampleBuffer {
    /// Create a mono buffer.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        AudioSampleBuffer {
            channels: vec![samples],
            sample_rate,
        }
    }

    /// Create a buffer from planar channel data.
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, BufferError> {
        if sample_rate == 0 {
            return Err(BufferError::InvalidSampleRate(sample_rate));
        }
        let expected = channels.first().ok_or(BufferError::NoChannels)?.len();
        if let Some((index, ch)) = channels.iter().enumerate().find(|(_, c)| c.len() != expected) {
            return Err(BufferError::RaggedChannels {
                index,
                len: ch.len(),
                expected,
            });
        }
        Ok(AudioSampleBuffer {
            channels,
            sample_rate,
        })
    }

    /// Create a silent buffer of the given shape.
    pub fn silent(channel_count: usize, len: usize, sample_rate: u32) -> Self {
        AudioSampleBuffer {
            channels: vec![vec![0.0; len]; channel_count.max(1)],
            sample_rate,
        }
    }

    /// De-interleave `frames` of `channel_count` interleaved samples.
    pub fn from_interleaved(
        interleaved: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, BufferError> {
        if channel_count == 0 {
            return Err(BufferError::NoChannels);
        }
        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (ch, &s) in channels.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        Self::from_channels(channels, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Length in sample frames.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub(crate) fn channel_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        self.channels.get_mut(index).map(Vec::as_mut_slice)
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Interleave all channels into one frame-major vector.
    pub fn to_interleaved(&self) -> Vec<f32> {
        let n = self.channel_count();
        let mut out = Vec::with_capacity(self.len() * n);
        for i in 0..self.len() {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }

    /// Largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |m, &s| m.max(s.abs()))
    }

    /// Read a sample with linear interpolation at a fractional frame position.
    pub fn read_interpolated(&self, channel: usize, position: f64) -> f32 {
        let Some(data) = self.channels.get(channel) else {
            return 0.0;
        };
        if data.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position as usize;
        if idx >= data.len() - 1 {
            return if idx < data.len() { data[idx] } else { 0.0 };
        }

        let frac = (position - idx as f64) as f32;
        data[idx] * (1.0 - frac) + data[idx + 1] * frac
    }

    /// Return a copy at `target_rate` using linear interpolation.
    ///
    /// Only used for assets (impulse responses, backing tracks) that have
    /// to join a graph running at the session's rate. Captured audio is
    /// never resampled.
    pub fn resampled(&self, target_rate: u32) -> AudioSampleBuffer {
        if target_rate == self.sample_rate || target_rate == 0 {
            return self.clone();
        }
        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = (self.len() as f64 / ratio).round() as usize;
        let channels = (0..self.channel_count())
            .map(|ch| {
                (0..out_len)
                    .map(|i| self.read_interpolated(ch, i as f64 * ratio))
                    .collect()
            })
            .collect();
        AudioSampleBuffer {
            channels,
            sample_rate: target_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ragged_channels() {
        let err = AudioSampleBuffer::from_channels(vec![vec![0.0; 4], vec![0.0; 3]], 44100)
            .unwrap_err();
        assert_eq!(
            err,
            BufferError::RaggedChannels {
                index: 1,
                len: 3,
                expected: 4
            }
        );
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let err = AudioSampleBuffer::from_channels(vec![vec![0.0; 4]], 0).unwrap_err();
        assert_eq!(err, BufferError::InvalidSampleRate(0));
    }

    #[test]
    fn interleave_roundtrip_keeps_frame_order() {
        let buf = AudioSampleBuffer::from_interleaved(&[1.0, -1.0, 2.0, -2.0], 2, 8000).unwrap();
        assert_eq!(buf.channel(0).unwrap(), &[1.0, 2.0]);
        assert_eq!(buf.channel(1).unwrap(), &[-1.0, -2.0]);
        assert_eq!(buf.to_interleaved(), vec![1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn duration_from_rate() {
        let buf = AudioSampleBuffer::mono(vec![0.0; 22050], 44100);
        assert!((buf.duration() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn interpolates_between_samples() {
        let buf = AudioSampleBuffer::mono(vec![0.0, 1.0], 1000);
        assert!((buf.read_interpolated(0, 0.25) - 0.25).abs() < 1e-6);
        assert_eq!(buf.read_interpolated(0, 5.0), 0.0);
        assert_eq!(buf.read_interpolated(3, 0.0), 0.0);
    }

    #[test]
    fn resample_halves_length() {
        let buf = AudioSampleBuffer::mono((0..100).map(|i| i as f32).collect(), 48000);
        let out = buf.resampled(24000);
        assert_eq!(out.sample_rate(), 24000);
        assert_eq!(out.len(), 50);
        assert!((out.channel(0).unwrap()[10] - 20.0).abs() < 1e-4);
    }
}
