//! Convolution reverb — uniformly partitioned FFT convolution.
//!
//! The impulse response is cut into partitions of one render quantum and
//! transformed once at build time. Each processed quantum is transformed,
//! pushed onto a frequency-domain delay line, multiplied against every
//! partition and transformed back; the second half of the inverse frame is
//! carried over as overlap. Output is sample-aligned with input (no added
//! latency), and after construction nothing allocates.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::buffer::AudioSampleBuffer;
use crate::codec::AssetError;

const GAIN_CALIBRATION_DB: f32 = -58.0;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

/// A decoded reverb impulse response, shared read-only by every convolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    buffer: AudioSampleBuffer,
}

impl ImpulseResponse {
    /// Wrap a decoded buffer. With `normalize` the response is scaled the
    /// way a browser `ConvolverNode` does by default, so loud and quiet
    /// recordings give a comparable reverb level.
    pub fn new(buffer: AudioSampleBuffer, normalize: bool) -> Result<Self, AssetError> {
        if buffer.is_empty() {
            return Err(AssetError::Empty);
        }
        let buffer = if normalize {
            let scale = normalization_scale(&buffer);
            let channels = buffer
                .channels()
                .iter()
                .map(|c| c.iter().map(|&s| s * scale).collect())
                .collect();
            AudioSampleBuffer::from_channels(channels, buffer.sample_rate())
                .map_err(|e| AssetError::Decode(e.to_string()))?
        } else {
            buffer
        };
        Ok(ImpulseResponse { buffer })
    }

    pub fn buffer(&self) -> &AudioSampleBuffer {
        &self.buffer
    }

    pub fn channel_count(&self) -> usize {
        self.buffer.channel_count()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Power-based scale factor applied to an impulse response on load.
fn normalization_scale(buffer: &AudioSampleBuffer) -> f32 {
    let count = (buffer.len() * buffer.channel_count()).max(1);
    let sum: f64 = buffer
        .channels()
        .iter()
        .flat_map(|c| c.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();
    let mut power = (sum / count as f64).sqrt() as f32;
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }

    let mut scale = 1.0 / power;
    scale *= 10f32.powf(GAIN_CALIBRATION_DB * 0.05);
    scale *= GAIN_CALIBRATION_SAMPLE_RATE / buffer.sample_rate() as f32;
    scale
}

/// Per-channel convolution state.
struct Lane {
    /// Partition spectra of the impulse response channel this lane uses.
    partitions: Arc<Vec<Vec<Complex<f32>>>>,
    /// Spectra of past input blocks, newest at `head`.
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    overlap: Vec<f32>,
    frame: Vec<f32>,
    accum: Vec<Complex<f32>>,
    time: Vec<f32>,
}

/// Zero-latency partitioned convolver for one graph instance.
pub struct Convolver {
    block_size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    fwd_scratch: Vec<Complex<f32>>,
    inv_scratch: Vec<Complex<f32>>,
    lanes: Vec<Lane>,
}

impl std::fmt::Debug for Convolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Convolver")
            .field("block_size", &self.block_size)
            .field("lanes", &self.lanes.len())
            .field(
                "partitions",
                &self.lanes.first().map_or(0, |l| l.partitions.len()),
            )
            .finish()
    }
}

impl Convolver {
    /// Prepare a convolver for `channels` graph channels at `sample_rate`.
    ///
    /// Graph channel `c` is convolved with impulse channel `min(c, last)`.
    /// A response recorded at another rate is resampled first.
    pub fn new(ir: &ImpulseResponse, sample_rate: u32, channels: usize, block_size: usize) -> Self {
        let fft_size = block_size * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let resampled = ir.buffer().resampled(sample_rate);
        let spectra: Vec<Arc<Vec<Vec<Complex<f32>>>>> = resampled
            .channels()
            .iter()
            .map(|data| Arc::new(partition_spectra(data, block_size, &forward)))
            .collect();

        let bins = block_size + 1;
        let lanes = (0..channels.max(1))
            .map(|c| {
                let partitions = Arc::clone(&spectra[c.min(spectra.len() - 1)]);
                let count = partitions.len();
                Lane {
                    partitions,
                    history: vec![vec![Complex::new(0.0, 0.0); bins]; count],
                    head: 0,
                    overlap: vec![0.0; block_size],
                    frame: forward.make_input_vec(),
                    accum: inverse.make_input_vec(),
                    time: inverse.make_output_vec(),
                }
            })
            .collect();

        Convolver {
            block_size,
            fwd_scratch: forward.make_scratch_vec(),
            inv_scratch: inverse.make_scratch_vec(),
            forward,
            inverse,
            lanes,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Convolve one block of `channel`. `input` and `output` must both be
    /// exactly one block long.
    pub fn process(&mut self, channel: usize, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.block_size);
        debug_assert_eq!(output.len(), self.block_size);
        let b = self.block_size;
        let Some(lane) = self.lanes.get_mut(channel) else {
            output.fill(0.0);
            return;
        };

        let count = lane.history.len();
        lane.head = (lane.head + count - 1) % count;

        lane.frame[..b].copy_from_slice(input);
        lane.frame[b..].fill(0.0);
        if self
            .forward
            .process_with_scratch(&mut lane.frame, &mut lane.history[lane.head], &mut self.fwd_scratch)
            .is_err()
        {
            output.fill(0.0);
            return;
        }

        lane.accum.fill(Complex::new(0.0, 0.0));
        for (j, h) in lane.partitions.iter().enumerate() {
            let x = &lane.history[(lane.head + j) % count];
            for ((acc, &xv), &hv) in lane.accum.iter_mut().zip(x.iter()).zip(h.iter()) {
                *acc += xv * hv;
            }
        }
        // DC and Nyquist bins of a real signal carry no imaginary part.
        lane.accum[0].im = 0.0;
        lane.accum[b].im = 0.0;

        if self
            .inverse
            .process_with_scratch(&mut lane.accum, &mut lane.time, &mut self.inv_scratch)
            .is_err()
        {
            output.fill(0.0);
            return;
        }

        let norm = 1.0 / (2 * b) as f32;
        for i in 0..b {
            output[i] = lane.time[i] * norm + lane.overlap[i];
            lane.overlap[i] = lane.time[b + i] * norm;
        }
    }

    /// Forget all past input.
    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            for h in &mut lane.history {
                h.fill(Complex::new(0.0, 0.0));
            }
            lane.overlap.fill(0.0);
            lane.head = 0;
        }
    }
}

/// Transform each `block_size` slice of `data`, zero-padded to twice its length.
fn partition_spectra(
    data: &[f32],
    block_size: usize,
    forward: &Arc<dyn RealToComplex<f32>>,
) -> Vec<Vec<Complex<f32>>> {
    let mut frame = forward.make_input_vec();
    let mut scratch = forward.make_scratch_vec();
    if data.is_empty() {
        return vec![forward.make_output_vec()];
    }
    data.chunks(block_size)
        .map(|chunk| {
            frame.fill(0.0);
            frame[..chunk.len()].copy_from_slice(chunk);
            let mut spectrum = forward.make_output_vec();
            // Lengths come from the plan itself, so this cannot fail.
            let _ = forward.process_with_scratch(&mut frame, &mut spectrum, &mut scratch);
            spectrum
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolution(x: &[f32], h: &[f32]) -> Vec<f32> {
        (0..x.len())
            .map(|n| {
                (0..h.len())
                    .filter(|&k| k <= n)
                    .map(|k| x[n - k] * h[k])
                    .sum()
            })
            .collect()
    }

    fn pseudo_noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn matches_direct_convolution() {
        let block = 16;
        let h = pseudo_noise(50, 7);
        let x = pseudo_noise(block * 8, 11);
        let ir = ImpulseResponse::new(AudioSampleBuffer::mono(h.clone(), 8000), false).unwrap();
        let mut conv = Convolver::new(&ir, 8000, 1, block);

        let mut out = vec![0.0f32; x.len()];
        for (inp, o) in x.chunks(block).zip(out.chunks_mut(block)) {
            conv.process(0, inp, o);
        }

        let expected = direct_convolution(&x, &h);
        for (i, (a, b)) in out.iter().zip(expected.iter()).enumerate() {
            assert!((a - b).abs() < 1e-4, "sample {i}: {a} vs {b}");
        }
    }

    #[test]
    fn unit_impulse_is_identity() {
        let block = 8;
        let ir = ImpulseResponse::new(AudioSampleBuffer::mono(vec![1.0], 8000), false).unwrap();
        let mut conv = Convolver::new(&ir, 8000, 1, block);
        let x: Vec<f32> = (0..block).map(|i| i as f32).collect();
        let mut out = vec![0.0; block];
        conv.process(0, &x, &mut out);
        for (a, b) in out.iter().zip(x.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn stereo_impulse_feeds_separate_lanes() {
        let block = 8;
        let buf = AudioSampleBuffer::from_channels(vec![vec![1.0], vec![-0.5]], 8000).unwrap();
        let ir = ImpulseResponse::new(buf, false).unwrap();
        let mut conv = Convolver::new(&ir, 8000, 2, block);
        let x = vec![1.0f32; block];
        let mut l = vec![0.0; block];
        let mut r = vec![0.0; block];
        conv.process(0, &x, &mut l);
        conv.process(1, &x, &mut r);
        assert!((l[3] - 1.0).abs() < 1e-5);
        assert!((r[3] + 0.5).abs() < 1e-5);
    }

    #[test]
    fn empty_impulse_is_rejected() {
        let err = ImpulseResponse::new(AudioSampleBuffer::mono(vec![], 44100), true).unwrap_err();
        assert!(matches!(err, AssetError::Empty));
    }

    #[test]
    fn normalization_tames_hot_responses() {
        let loud = ImpulseResponse::new(AudioSampleBuffer::mono(vec![0.9; 4410], 44100), true).unwrap();
        let quiet = ImpulseResponse::new(AudioSampleBuffer::mono(vec![0.09; 4410], 44100), true).unwrap();
        let a = loud.buffer().channel(0).unwrap()[0];
        let b = quiet.buffer().channel(0).unwrap()[0];
        assert!((a - b).abs() < 1e-6, "normalized levels differ: {a} vs {b}");
    }
}
