//! Offline renderer — runs the voice chain over a whole take, faster than real time.
//!
//! The rendering context is sized to the input exactly: effect tails that
//! would ring past the last input sample are cut off, so the output has
//! the same length and rate as the take.

use thiserror::Error;

use super::convolver::ImpulseResponse;
use super::graph::{EffectGraph, GraphContext, GraphError, RENDER_QUANTUM};
use crate::buffer::AudioSampleBuffer;
use crate::params::EffectParameters;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("nothing to render: the input buffer is empty")]
    EmptyInput,

    #[error("effect graph could not be built: {0}")]
    Graph(#[from] GraphError),

    #[error("render produced a non-finite sample at frame {frame}, channel {channel}")]
    NonFinite { frame: usize, channel: usize },
}

/// A source that plays a buffer once from its first frame.
struct BufferSource<'a> {
    buffer: &'a AudioSampleBuffer,
    position: usize,
}

impl<'a> BufferSource<'a> {
    fn new(buffer: &'a AudioSampleBuffer) -> Self {
        BufferSource { buffer, position: 0 }
    }

    /// Copy the next quantum into `block`, zero-padded past the end.
    fn fill(&mut self, block: &mut [Vec<f32>]) {
        let len = self.buffer.len();
        let start = self.position.min(len);
        let end = (self.position + RENDER_QUANTUM).min(len);
        for (c, dst) in block.iter_mut().enumerate() {
            let src = self.buffer.channel(c).unwrap_or(&[]);
            let n = end - start;
            if src.len() >= end {
                dst[..n].copy_from_slice(&src[start..end]);
            } else {
                dst[..n].fill(0.0);
            }
            dst[n..].fill(0.0);
        }
        self.position += RENDER_QUANTUM;
    }
}

/// Render `input` through a fresh voice chain built from `snapshot`.
///
/// Never touches its inputs, and identical inputs give bit-identical
/// output. Without an impulse response the reverb stage is bypassed
/// (fully dry) instead of failing.
pub fn render(
    input: &AudioSampleBuffer,
    snapshot: EffectParameters,
    impulse: Option<&ImpulseResponse>,
) -> Result<AudioSampleBuffer, RenderError> {
    if input.is_empty() {
        return Err(RenderError::EmptyInput);
    }

    let length = input.len();
    let context = GraphContext::new(input.sample_rate(), input.channel_count(), impulse);
    let mut graph = EffectGraph::build(context, snapshot.validated(), impulse)?;
    let mut output = AudioSampleBuffer::silent(context.channels, length, input.sample_rate());

    log::debug!(
        "offline render: {} frames @ {} Hz, {} channel(s), reverb {}",
        length,
        input.sample_rate(),
        context.channels,
        if graph.reverb_enabled() { "on" } else { "bypassed" }
    );

    let mut source = BufferSource::new(input);
    let mut block = vec![vec![0.0f32; RENDER_QUANTUM]; input.channel_count()];
    let mut frame = 0;
    while frame < length {
        source.fill(&mut block);
        graph.process_quantum(&block);

        let n = RENDER_QUANTUM.min(length - frame);
        for c in 0..context.channels {
            let rendered = &graph.output(c)[..n];
            if let Some(i) = rendered.iter().position(|s| !s.is_finite()) {
                return Err(RenderError::NonFinite {
                    frame: frame + i,
                    channel: c,
                });
            }
            if let Some(dst) = output.channel_mut(c) {
                dst[frame..frame + n].copy_from_slice(rendered);
            }
        }
        frame += n;
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, seconds: f32, sample_rate: u32, amplitude: f32) -> AudioSampleBuffer {
        let n = (seconds * sample_rate as f32) as usize;
        let data = (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * amplitude)
            .collect();
        AudioSampleBuffer::mono(data, sample_rate)
    }

    fn room(sample_rate: u32) -> ImpulseResponse {
        let n = sample_rate as usize / 10;
        let data = (0..n)
            .map(|i| {
                let decay = (-(i as f32) / (n as f32 / 6.0)).exp();
                let noise = ((i * 7919) % 113) as f32 / 56.5 - 1.0;
                noise * decay
            })
            .collect();
        ImpulseResponse::new(AudioSampleBuffer::mono(data, sample_rate), true).unwrap()
    }

    #[test]
    fn render_is_deterministic() {
        let input = tone(440.0, 0.5, 22050, 0.5);
        let ir = room(22050);
        let params = EffectParameters::default().with_reverb_mix(0.4);
        let a = render(&input, params, Some(&ir)).unwrap();
        let b = render(&input, params, Some(&ir)).unwrap();
        let bits = |buf: &AudioSampleBuffer| -> Vec<u32> {
            buf.channels().iter().flatten().map(|s| s.to_bits()).collect()
        };
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn default_render_of_two_second_tone() {
        let input = tone(440.0, 2.0, 44100, 0.5);
        let out = render(&input, EffectParameters::default(), None).unwrap();

        // Sized to the input: echo tails past the end are not kept.
        assert_eq!(out.len(), input.len());
        assert_eq!(out.sample_rate(), 44100);
        assert_eq!(out.channel_count(), 1);

        let peak = out.peak();
        assert!(peak > 0.1, "output should not be silent, peak {peak}");
        assert!(peak <= 1.0, "output clipped, peak {peak}");
    }

    #[test]
    fn echo_tail_is_truncated_at_input_length() {
        let sr = 8000;
        let mut data = vec![0.0f32; 1000];
        data[0] = 1.0;
        let input = AudioSampleBuffer::mono(data, sr);
        let params = EffectParameters::default().with_echo_delay(0.2).with_echo_feedback(0.0);
        let out = render(&input, params, None).unwrap();
        // The echo would land at frame 1600, past the end.
        assert_eq!(out.len(), 1000);
        assert!(out.channel(0).unwrap()[1..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn missing_impulse_matches_forced_dry_reverb() {
        let input = tone(330.0, 0.4, 22050, 0.6);
        let ir = room(22050);
        let wet = EffectParameters::default().with_reverb_mix(0.7);
        let bypassed = render(&input, wet, None).unwrap();
        let forced_dry = render(&input, wet.with_reverb_mix(0.0), Some(&ir)).unwrap();
        assert_eq!(bypassed.len(), forced_dry.len());
        assert_eq!(bypassed.channel(0).unwrap(), forced_dry.channel(0).unwrap());
    }

    #[test]
    fn reverb_changes_the_signal_when_present() {
        let input = tone(330.0, 0.4, 22050, 0.6);
        let ir = room(22050);
        let params = EffectParameters::default().with_reverb_mix(0.7);
        let dry = render(&input, params, None).unwrap();
        let wet = render(&input, params, Some(&ir)).unwrap();
        assert_ne!(dry.channel(0).unwrap(), wet.channel(0).unwrap());
    }

    #[test]
    fn input_is_not_mutated() {
        let input = tone(220.0, 0.1, 8000, 0.5);
        let before = input.clone();
        let _ = render(&input, EffectParameters::default().with_master_gain(2.0), None).unwrap();
        assert_eq!(input, before);
    }

    #[test]
    fn empty_input_fails() {
        let input = AudioSampleBuffer::mono(vec![], 44100);
        assert_eq!(
            render(&input, EffectParameters::default(), None).unwrap_err(),
            RenderError::EmptyInput
        );
    }

    #[test]
    fn non_finite_output_is_a_render_failure() {
        let mut data = vec![0.0f32; 300];
        data[10] = f32::INFINITY;
        let input = AudioSampleBuffer::mono(data, 8000);
        let err = render(&input, EffectParameters::default(), None).unwrap_err();
        assert_eq!(err, RenderError::NonFinite { frame: 10, channel: 0 });
    }

    #[test]
    fn partial_last_quantum_is_kept() {
        let input = AudioSampleBuffer::mono(vec![0.25; RENDER_QUANTUM + 5], 8000);
        let params = EffectParameters::default().with_echo_mix(0.0);
        let out = render(&input, params, None).unwrap();
        assert_eq!(out.len(), RENDER_QUANTUM + 5);
        assert_eq!(out.channel(0).unwrap()[RENDER_QUANTUM + 4], 0.25);
    }
}
