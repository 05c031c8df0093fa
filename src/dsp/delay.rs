//! Delay line — the echo node's memory.
//!
//! Unlike a self-contained delay effect, this node does no mixing and no
//! feedback of its own: the graph reads its output at the start of a
//! quantum and writes the summed input (dry signal plus the feedback gain
//! stage) at the end, which is what closes the echo loop.

/// A multi-channel circular delay line with a block-level read/write API.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffers: Vec<Vec<f32>>,
    write_pos: usize,
    sample_rate: f64,
    min_delay: usize,
    delay_samples: usize,
}

impl DelayLine {
    /// Create a delay line.
    ///
    /// # Arguments
    /// - `channels`: Number of independent channels.
    /// - `sample_rate`: Audio sample rate in Hz.
    /// - `max_delay_seconds`: Longest delay the line must hold.
    /// - `min_delay`: Shortest delay in samples. A line inside a feedback
    ///   cycle must delay by at least one block.
    pub fn new(channels: usize, sample_rate: f64, max_delay_seconds: f64, min_delay: usize) -> Self {
        let max_samples = (sample_rate * max_delay_seconds).ceil() as usize;
        let buffer_size = max_samples.max(min_delay) + min_delay.max(1);
        Self {
            buffers: vec![vec![0.0; buffer_size]; channels.max(1)],
            write_pos: 0,
            sample_rate,
            min_delay,
            delay_samples: min_delay,
        }
    }

    /// Set the delay time in seconds, clamped to the line's range.
    pub fn set_delay_time(&mut self, seconds: f64) {
        let requested = (seconds.max(0.0) * self.sample_rate).round() as usize;
        self.delay_samples = requested.clamp(self.min_delay, self.max_delay_samples());
    }

    /// Current delay in samples.
    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    fn max_delay_samples(&self) -> usize {
        self.buffers[0].len() - self.min_delay.max(1)
    }

    /// Read the delayed signal for the next `output.len()` samples of `channel`.
    ///
    /// Must be called before `write` for the same block.
    #[inline]
    pub fn read(&self, channel: usize, output: &mut [f32]) {
        let buffer = &self.buffers[channel.min(self.buffers.len() - 1)];
        let len = buffer.len();
        let start = (self.write_pos + len - self.delay_samples) % len;
        for (i, out) in output.iter_mut().enumerate() {
            *out = buffer[(start + i) % len];
        }
    }

    /// Write one block of input for `channel`.
    #[inline]
    pub fn write(&mut self, channel: usize, input: &[f32]) {
        let last = self.buffers.len() - 1;
        let buffer = &mut self.buffers[channel.min(last)];
        let len = buffer.len();
        for (i, &s) in input.iter().enumerate() {
            buffer[(self.write_pos + i) % len] = s;
        }
    }

    /// Advance the write head after every channel has been written.
    #[inline]
    pub fn advance(&mut self, samples: usize) {
        self.write_pos = (self.write_pos + samples) % self.buffers[0].len();
    }

    /// Clear the delay buffers.
    pub fn clear(&mut self) {
        for b in &mut self.buffers {
            b.fill(0.0);
        }
        self.write_pos = 0;
    }
}
