//! Effect graph — the echo → reverb → master chain, as data and as a processor.
//!
//! The chain is described once by [`voice_chain`] as a [`Topology`] (named
//! nodes plus routing edges). [`EffectGraph::build`] turns any topology into
//! a runnable instance for a [`GraphContext`]; the live monitor and the
//! offline renderer both instantiate the same description, only the
//! [`ParameterSource`] differs (live atomics vs. a by-value snapshot).
//!
//! ```text
//!   entry ─┬─► echo-dry ──────────────────┐
//!          └─► echo-delay ─┬─► echo-wet ──┴─► reverb-input ─┬─► reverb-dry ───────────┐
//!                 ▲        │                                └─► convolver ─► reverb-wet ┴─► master ─► destination
//!                 └ feedback ◄┘
//! ```
//!
//! Processing runs in render quanta of [`RENDER_QUANTUM`] frames. Delay
//! nodes are read at the start of a quantum and written at the end, which
//! is what lets a feedback cycle exist; a delay is never shorter than one
//! quantum.

use std::collections::VecDeque;

use thiserror::Error;

use super::convolver::{Convolver, ImpulseResponse};
use super::delay::DelayLine;
use crate::params::{EffectParameters, MAX_ECHO_DELAY, ParameterSource};

/// Frames processed per graph step.
pub const RENDER_QUANTUM: usize = 128;

/// Graph instances never run more channels than this.
pub const MAX_GRAPH_CHANNELS: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("topology has no entry node")]
    MissingEntry,

    #[error("topology has no destination node")]
    MissingDestination,

    #[error("topology has more than one {0} node")]
    DuplicateTerminal(&'static str),

    #[error("cycle through '{0}' is not broken by a delay node")]
    UndelayedCycle(&'static str),
}

/// Index of a node inside a [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Which parameter a gain stage follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainBinding {
    /// Fixed gain of 1; used as a summing point.
    Unity,
    EchoDry,
    EchoWet,
    EchoFeedback,
    ReverbDry,
    ReverbWet,
    Master,
}

impl GainBinding {
    /// Resolve the gain for this quantum. Without a convolver the reverb
    /// pair collapses to fully dry, so the wet path contributes silence.
    pub fn resolve(self, params: &EffectParameters, reverb_enabled: bool) -> f32 {
        match self {
            GainBinding::Unity => 1.0,
            GainBinding::EchoDry => params.echo().dry,
            GainBinding::EchoWet => params.echo().wet,
            GainBinding::EchoFeedback => params.echo_feedback(),
            GainBinding::ReverbDry if reverb_enabled => params.reverb().dry,
            GainBinding::ReverbDry => 1.0,
            GainBinding::ReverbWet if reverb_enabled => params.reverb().wet,
            GainBinding::ReverbWet => 0.0,
            GainBinding::Master => params.master_gain(),
        }
    }
}

/// What a node does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Where the source is connected.
    Entry,
    Gain(GainBinding),
    /// Delay line following the echo delay time.
    EchoDelay,
    /// Convolution against the session's impulse response.
    Convolver,
    /// Where the processed signal leaves the graph.
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: &'static str,
    pub kind: NodeKind,
}

/// A graph description: nodes and directed edges, no processing state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    nodes: Vec<NodeSpec>,
    edges: Vec<(NodeId, NodeId)>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &'static str, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeSpec { name, kind });
        NodeId(self.nodes.len() - 1)
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        self.edges.push((from, to));
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(NodeId, NodeId)] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> &NodeSpec {
        &self.nodes[id.0]
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// Sources feeding `id`, in edge insertion order.
    pub fn inputs_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges.iter().filter(move |(_, to)| *to == id).map(|(from, _)| *from)
    }

    fn single(&self, kind: NodeKind, label: &'static str) -> Result<Option<NodeId>, GraphError> {
        let mut found = self.nodes.iter().enumerate().filter(|(_, n)| n.kind == kind);
        let first = found.next().map(|(i, _)| NodeId(i));
        if found.next().is_some() {
            return Err(GraphError::DuplicateTerminal(label));
        }
        Ok(first)
    }

    pub fn entry(&self) -> Result<NodeId, GraphError> {
        self.single(NodeKind::Entry, "entry")?.ok_or(GraphError::MissingEntry)
    }

    pub fn destination(&self) -> Result<NodeId, GraphError> {
        self.single(NodeKind::Destination, "destination")?
            .ok_or(GraphError::MissingDestination)
    }

    /// Topological order, ignoring edges into delay nodes (their input is
    /// consumed one quantum later).
    pub fn evaluation_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let n = self.nodes.len();
        let counts = |(_, to): &&(NodeId, NodeId)| self.nodes[to.0].kind != NodeKind::EchoDelay;

        let mut indegree = vec![0usize; n];
        for (_, to) in self.edges.iter().filter(counts) {
            indegree[to.0] += 1;
        }

        let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_front() {
            order.push(NodeId(i));
            for (_, to) in self.edges.iter().filter(counts).filter(|(from, _)| from.0 == i) {
                indegree[to.0] -= 1;
                if indegree[to.0] == 0 {
                    ready.push_back(to.0);
                }
            }
        }

        if order.len() < n {
            let stuck = (0..n).find(|&i| indegree[i] > 0).unwrap_or(0);
            return Err(GraphError::UndelayedCycle(self.nodes[stuck].name));
        }
        Ok(order)
    }
}

/// The fixed echo → reverb → master chain.
pub fn voice_chain() -> Topology {
    let mut t = Topology::new();
    let entry = t.add("entry", NodeKind::Entry);
    let echo_dry = t.add("echo-dry-gain", NodeKind::Gain(GainBinding::EchoDry));
    let echo_delay = t.add("echo-delay-line", NodeKind::EchoDelay);
    let feedback = t.add("feedback-gain", NodeKind::Gain(GainBinding::EchoFeedback));
    let echo_wet = t.add("echo-wet-gain", NodeKind::Gain(GainBinding::EchoWet));
    let reverb_input = t.add("reverb-input", NodeKind::Gain(GainBinding::Unity));
    let reverb_dry = t.add("reverb-dry-gain", NodeKind::Gain(GainBinding::ReverbDry));
    let convolver = t.add("convolution-node", NodeKind::Convolver);
    let reverb_wet = t.add("reverb-wet-gain", NodeKind::Gain(GainBinding::ReverbWet));
    let master = t.add("master-gain", NodeKind::Gain(GainBinding::Master));
    let destination = t.add("destination", NodeKind::Destination);

    t.connect(entry, echo_dry);
    t.connect(entry, echo_delay);
    t.connect(echo_delay, feedback);
    t.connect(feedback, echo_delay);
    t.connect(echo_delay, echo_wet);
    t.connect(echo_dry, reverb_input);
    t.connect(echo_wet, reverb_input);
    t.connect(reverb_input, reverb_dry);
    t.connect(reverb_input, convolver);
    t.connect(convolver, reverb_wet);
    t.connect(reverb_dry, master);
    t.connect(reverb_wet, master);
    t.connect(master, destination);
    t
}

/// The rendering context a graph instance is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphContext {
    pub sample_rate: u32,
    pub channels: usize,
}

impl GraphContext {
    /// Channel count follows the wider of the source and the impulse
    /// response, capped at [`MAX_GRAPH_CHANNELS`].
    pub fn new(sample_rate: u32, source_channels: usize, impulse: Option<&ImpulseResponse>) -> Self {
        let ir_channels = impulse.map_or(1, ImpulseResponse::channel_count);
        GraphContext {
            sample_rate,
            channels: source_channels.max(ir_channels).clamp(1, MAX_GRAPH_CHANNELS),
        }
    }
}

/// Per-node processing state.
enum NodeState {
    Stateless,
    Delay(DelayLine),
    /// `None` when no impulse response is loaded: the node emits silence.
    Convolver(Option<Convolver>),
}

/// A runnable instance of a [`Topology`].
pub struct EffectGraph<P> {
    topology: Topology,
    context: GraphContext,
    params: P,
    kinds: Vec<NodeKind>,
    order: Vec<usize>,
    inputs: Vec<Vec<usize>>,
    delays: Vec<usize>,
    states: Vec<NodeState>,
    /// Planar output of every node for the current quantum.
    outputs: Vec<Vec<f32>>,
    scratch: Vec<f32>,
    destination: usize,
    reverb_enabled: bool,
}

impl<P: ParameterSource> EffectGraph<P> {
    /// Build the standard voice chain.
    pub fn build(context: GraphContext, params: P, impulse: Option<&ImpulseResponse>) -> Result<Self, GraphError> {
        Self::from_topology(voice_chain(), context, params, impulse)
    }

    /// Instantiate any topology against `context`.
    pub fn from_topology(
        topology: Topology,
        context: GraphContext,
        params: P,
        impulse: Option<&ImpulseResponse>,
    ) -> Result<Self, GraphError> {
        topology.entry()?;
        let destination = topology.destination()?.index();
        let order = topology.evaluation_order()?.into_iter().map(NodeId::index).collect();

        let channels = context.channels.max(1);
        let width = channels * RENDER_QUANTUM;
        let kinds: Vec<NodeKind> = topology.nodes().iter().map(|n| n.kind).collect();
        let inputs = (0..kinds.len())
            .map(|i| topology.inputs_of(NodeId(i)).map(NodeId::index).collect())
            .collect();
        let delays = kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == NodeKind::EchoDelay)
            .map(|(i, _)| i)
            .collect();

        let mut reverb_enabled = false;
        let states = kinds
            .iter()
            .map(|kind| match kind {
                NodeKind::EchoDelay => NodeState::Delay(DelayLine::new(
                    channels,
                    context.sample_rate as f64,
                    MAX_ECHO_DELAY as f64,
                    RENDER_QUANTUM,
                )),
                NodeKind::Convolver => {
                    let conv = impulse
                        .map(|ir| Convolver::new(ir, context.sample_rate, channels, RENDER_QUANTUM));
                    reverb_enabled |= conv.is_some();
                    NodeState::Convolver(conv)
                }
                _ => NodeState::Stateless,
            })
            .collect();

        Ok(EffectGraph {
            outputs: vec![vec![0.0; width]; kinds.len()],
            scratch: vec![0.0; width],
            topology,
            context: GraphContext { channels, ..context },
            params,
            kinds,
            order,
            inputs,
            delays,
            states,
            destination,
            reverb_enabled,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn context(&self) -> GraphContext {
        self.context
    }

    pub fn sample_rate(&self) -> u32 {
        self.context.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.context.channels
    }

    pub fn parameters(&self) -> &P {
        &self.params
    }

    /// Whether a convolver is present. When false the reverb pair is
    /// forced fully dry.
    pub fn reverb_enabled(&self) -> bool {
        self.reverb_enabled
    }

    /// Process one quantum. `input` holds one slice per source channel,
    /// each [`RENDER_QUANTUM`] frames; fewer source channels than graph
    /// channels are up-mixed by repeating the last one. Read the result
    /// with [`EffectGraph::output`].
    pub fn process_quantum<S: AsRef<[f32]>>(&mut self, input: &[S]) {
        let params = self.params.current();
        let channels = self.context.channels;
        let q = RENDER_QUANTUM;

        for step in 0..self.order.len() {
            let n = self.order[step];
            let mut out = std::mem::take(&mut self.outputs[n]);
            match self.kinds[n] {
                NodeKind::Entry => {
                    for c in 0..channels {
                        let dst = &mut out[c * q..(c + 1) * q];
                        match input.get(c.min(input.len().saturating_sub(1))) {
                            Some(src) => {
                                let src = src.as_ref();
                                let m = src.len().min(q);
                                dst[..m].copy_from_slice(&src[..m]);
                                dst[m..].fill(0.0);
                            }
                            None => dst.fill(0.0),
                        }
                    }
                }
                NodeKind::Gain(binding) => {
                    sum_inputs(&self.inputs[n], &self.outputs, &mut out);
                    let g = binding.resolve(&params, self.reverb_enabled);
                    for s in out.iter_mut() {
                        *s *= g;
                    }
                }
                NodeKind::EchoDelay => {
                    if let NodeState::Delay(line) = &mut self.states[n] {
                        line.set_delay_time(params.echo_delay() as f64);
                        for c in 0..channels {
                            line.read(c, &mut out[c * q..(c + 1) * q]);
                        }
                    }
                }
                NodeKind::Convolver => match &mut self.states[n] {
                    NodeState::Convolver(Some(conv)) => {
                        sum_inputs(&self.inputs[n], &self.outputs, &mut self.scratch);
                        for c in 0..channels {
                            let range = c * q..(c + 1) * q;
                            conv.process(c, &self.scratch[range.clone()], &mut out[range]);
                        }
                    }
                    _ => out.fill(0.0),
                },
                NodeKind::Destination => {
                    sum_inputs(&self.inputs[n], &self.outputs, &mut out);
                }
            }
            self.outputs[n] = out;
        }

        // Close feedback loops: delay inputs are only complete now.
        for &n in &self.delays {
            sum_inputs(&self.inputs[n], &self.outputs, &mut self.scratch);
            if let NodeState::Delay(line) = &mut self.states[n] {
                for c in 0..channels {
                    line.write(c, &self.scratch[c * q..(c + 1) * q]);
                }
                line.advance(q);
            }
        }
    }

    /// Destination output of `channel` for the last processed quantum.
    pub fn output(&self, channel: usize) -> &[f32] {
        let c = channel.min(self.context.channels - 1);
        &self.outputs[self.destination][c * RENDER_QUANTUM..(c + 1) * RENDER_QUANTUM]
    }

    /// Clear delay lines and convolution history.
    pub fn reset(&mut self) {
        for state in &mut self.states {
            match state {
                NodeState::Delay(line) => line.clear(),
                NodeState::Convolver(Some(conv)) => conv.reset(),
                _ => {}
            }
        }
        for out in &mut self.outputs {
            out.fill(0.0);
        }
    }
}

impl<P> std::fmt::Debug for EffectGraph<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectGraph")
            .field("context", &self.context)
            .field("nodes", &self.topology.nodes().len())
            .field("reverb_enabled", &self.reverb_enabled)
            .finish()
    }
}

/// Sum the outputs of `sources` into `out`.
#[inline]
fn sum_inputs(sources: &[usize], outputs: &[Vec<f32>], out: &mut [f32]) {
    out.fill(0.0);
    for &src in sources {
        for (o, &s) in out.iter_mut().zip(outputs[src].iter()) {
            *o += s;
        }
    }
}
