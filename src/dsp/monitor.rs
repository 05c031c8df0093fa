//! Live monitor — runs the live graph inside a device callback.
//!
//! Device callbacks arrive in whatever size the platform picks, while the
//! graph steps one render quantum at a time. The monitor bridges the two
//! with a one-quantum input/output FIFO, so the monitored signal is one
//! quantum late. Nothing here allocates after construction.

use super::convolver::ImpulseResponse;
use super::graph::{EffectGraph, GraphContext, GraphError, RENDER_QUANTUM};
use crate::params::SharedParameters;

/// The live effect chain wrapped for arbitrary callback sizes.
#[derive(Debug)]
pub struct LiveMonitor {
    graph: EffectGraph<SharedParameters>,
    input: Vec<f32>,
    output: Vec<f32>,
    fill: usize,
}

impl LiveMonitor {
    /// Build a live graph bound to `params` for a mono source.
    pub fn new(
        sample_rate: u32,
        params: SharedParameters,
        impulse: Option<&ImpulseResponse>,
    ) -> Result<Self, GraphError> {
        let context = GraphContext::new(sample_rate, 1, impulse);
        let graph = EffectGraph::build(context, params, impulse)?;
        Ok(LiveMonitor {
            output: vec![0.0; context.channels * RENDER_QUANTUM],
            input: vec![0.0; RENDER_QUANTUM],
            fill: 0,
            graph,
        })
    }

    pub fn graph(&self) -> &EffectGraph<SharedParameters> {
        &self.graph
    }

    /// Latency added by the FIFO, in frames.
    pub fn latency_frames(&self) -> usize {
        RENDER_QUANTUM
    }

    /// Process mono `input` into interleaved `output` with `out_channels`
    /// channels. Device channel `d` takes graph channel `min(d, last)`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], out_channels: usize) {
        let out_channels = out_channels.max(1);
        let graph_channels = self.graph.channels();
        let frames = input.len().min(output.len() / out_channels);

        for (i, &sample) in input.iter().take(frames).enumerate() {
            let frame = &mut output[i * out_channels..(i + 1) * out_channels];
            for (d, slot) in frame.iter_mut().enumerate() {
                let c = d.min(graph_channels - 1);
                *slot = self.output[c * RENDER_QUANTUM + self.fill];
            }

            self.input[self.fill] = sample;
            self.fill += 1;
            if self.fill == RENDER_QUANTUM {
                self.graph.process_quantum(&[&self.input]);
                for c in 0..graph_channels {
                    self.output[c * RENDER_QUANTUM..(c + 1) * RENDER_QUANTUM]
                        .copy_from_slice(self.graph.output(c));
                }
                self.fill = 0;
            }
        }

        output[frames * out_channels..].fill(0.0);
    }

    /// Drop any buffered audio and effect tails.
    pub fn reset(&mut self) {
        self.graph.reset();
        self.input.fill(0.0);
        self.output.fill(0.0);
        self.fill = 0;
    }
}
