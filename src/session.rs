//! Recording session — owns one take from microphone to encoded file.
//!
//! Lifecycle: `Idle → Capturing → Stopped → Rendering → Ready`, with a new
//! take allowed from `Stopped` or `Ready`. Renders are split into
//! `begin_render` (snapshot + ticket, on the session's thread), a
//! `PendingRender::run` that may go to a worker thread, and
//! `complete_render`, which only commits the newest ticket. A pending or
//! completed render dropped without being committed releases the session
//! back to the state it had before rendering.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::buffer::AudioSampleBuffer;
use crate::capture::{CaptureError, CaptureUnit, InputDevice, SampleAccumulator};
use crate::codec::{AssetError, EncodedArtifact, Encoder, WavEncoder};
use crate::config::SessionConfig;
use crate::dsp::convolver::ImpulseResponse;
use crate::dsp::mixer::{TimingAdjustment, TimingMixer};
use crate::dsp::monitor::LiveMonitor;
use crate::dsp::renderer::{self, RenderError};
use crate::error::SessionError;
use crate::params::{EffectParameters, SharedParameters};
use crate::remote::{FinalMixRequest, UploadRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Stopped,
    Rendering,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Stopped => "stopped",
            SessionState::Rendering => "rendering",
            SessionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Identifies one render request. Later tickets compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderTicket(u64);

impl RenderTicket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Raised while a render is outstanding; lowered when it is dropped.
#[derive(Debug)]
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything one offline render needs, detached from the session.
#[derive(Debug)]
pub struct PendingRender {
    ticket: RenderTicket,
    take: Arc<AudioSampleBuffer>,
    snapshot: EffectParameters,
    impulse: Option<Arc<ImpulseResponse>>,
    guard: InFlight,
}

/// A finished render waiting to be committed.
#[derive(Debug)]
pub struct CompletedRender {
    pub ticket: RenderTicket,
    pub snapshot: EffectParameters,
    pub result: Result<AudioSampleBuffer, RenderError>,
    _guard: InFlight,
}

impl PendingRender {
    pub fn ticket(&self) -> RenderTicket {
        self.ticket
    }

    pub fn snapshot(&self) -> EffectParameters {
        self.snapshot
    }

    /// Render the take. Safe to call on any thread.
    pub fn run(self) -> CompletedRender {
        let result = renderer::render(&self.take, self.snapshot, self.impulse.as_deref());
        CompletedRender {
            ticket: self.ticket,
            snapshot: self.snapshot,
            result,
            _guard: self.guard,
        }
    }
}

/// A committed render and the parameters it was made with.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTake {
    pub ticket: RenderTicket,
    pub snapshot: EffectParameters,
    pub buffer: AudioSampleBuffer,
}

pub struct RecordingSession<D: InputDevice> {
    config: SessionConfig,
    capture: CaptureUnit<D>,
    accumulator: SampleAccumulator,
    params: SharedParameters,
    impulse: Option<Arc<ImpulseResponse>>,
    take: Option<Arc<AudioSampleBuffer>>,
    renders: Vec<RenderedTake>,
    state: SessionState,
    /// State to fall back to if the in-flight render fails or is dropped.
    before_render: SessionState,
    next_ticket: u64,
    in_flight: Option<(RenderTicket, Arc<AtomicBool>)>,
    timing: TimingAdjustment,
    impulse_requested: bool,
}

impl<D: InputDevice> RecordingSession<D> {
    pub fn new(device: D, config: SessionConfig) -> Self {
        RecordingSession {
            capture: CaptureUnit::new(device, config.capture_ring_blocks),
            accumulator: SampleAccumulator::default(),
            params: SharedParameters::new(config.effects),
            impulse: None,
            take: None,
            renders: Vec::new(),
            state: SessionState::Idle,
            before_render: SessionState::Idle,
            next_ticket: 0,
            in_flight: None,
            timing: config.timing,
            impulse_requested: false,
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.render_abandoned() {
            self.before_render
        } else {
            self.state
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Live parameters. Clones share the same values.
    pub fn parameters(&self) -> &SharedParameters {
        &self.params
    }

    fn render_abandoned(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|(_, alive)| !alive.load(Ordering::Acquire))
    }

    /// Fall back from `Rendering` if the in-flight render was dropped.
    fn reclaim_abandoned(&mut self) {
        if !self.render_abandoned() {
            return;
        }
        if let Some((ticket, _)) = self.in_flight.take() {
            log::warn!("render {} was dropped before completing", ticket.value());
        }
        self.state = self.before_render;
    }

    fn require(&mut self, operation: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        self.reclaim_abandoned();
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Install the fetched impulse response, or degrade to dry reverb if
    /// fetching or decoding failed. Returns whether reverb is available.
    pub fn attach_impulse_response(&mut self, asset: Result<AudioSampleBuffer, AssetError>) -> bool {
        let loaded = asset.and_then(|buffer| {
            ImpulseResponse::new(buffer, self.config.normalize_impulse_response)
        });
        match loaded {
            Ok(ir) => {
                log::info!(
                    "impulse response loaded: {} frame(s), {} channel(s)",
                    ir.len(),
                    ir.channel_count()
                );
                self.impulse = Some(Arc::new(ir));
                true
            }
            Err(e) => {
                log::warn!("impulse response unavailable, reverb disabled: {e}");
                self.impulse = None;
                false
            }
        }
    }

    pub fn has_impulse_response(&self) -> bool {
        self.impulse.is_some()
    }

    pub fn impulse_response_url(&self) -> Option<&str> {
        self.config.impulse_response_url.as_deref()
    }

    /// Fetch the configured impulse response through `fetch` and attach it.
    /// Only the first call fetches; later calls report what it produced.
    /// Without a configured URL the reverb stays dry.
    pub fn load_impulse_response<F>(&mut self, fetch: F) -> bool
    where
        F: FnOnce(&str) -> Result<AudioSampleBuffer, AssetError>,
    {
        if self.impulse_requested {
            return self.has_impulse_response();
        }
        let Some(url) = self.config.impulse_response_url.clone() else {
            log::info!("no impulse response configured, reverb disabled");
            return false;
        };
        self.impulse_requested = true;
        log::debug!("fetching impulse response from {url}");
        self.attach_impulse_response(fetch(&url))
    }

    /// Start a new take. Any previous take is discarded.
    pub fn start_capture(&mut self) -> Result<(), SessionError> {
        self.require(
            "start_capture",
            &[SessionState::Idle, SessionState::Stopped, SessionState::Ready],
        )?;
        let sample_rate = self.capture.start()?;
        self.accumulator.reset(sample_rate);
        self.take = None;
        self.state = SessionState::Capturing;
        Ok(())
    }

    /// Move captured blocks from the ring into the take. Call regularly
    /// while capturing.
    pub fn pump(&mut self) -> usize {
        self.capture.drain_into(&mut self.accumulator)
    }

    /// End the take and keep it for rendering.
    pub fn stop_capture(&mut self) -> Result<Arc<AudioSampleBuffer>, SessionError> {
        self.require("stop_capture", &[SessionState::Capturing])?;
        self.capture.stop();
        self.pump();
        let lost = self.capture.overruns();
        if lost > 0 {
            self.state = SessionState::Idle;
            return Err(CaptureError::Overrun { lost }.into());
        }
        match self.accumulator.finalize() {
            Ok(buffer) => {
                log::info!(
                    "take captured: {:.2}s @ {} Hz",
                    buffer.duration(),
                    buffer.sample_rate()
                );
                let take = Arc::new(buffer);
                self.take = Some(Arc::clone(&take));
                self.state = SessionState::Stopped;
                Ok(take)
            }
            Err(e) => {
                self.state = SessionState::Idle;
                Err(e.into())
            }
        }
    }

    pub fn take(&self) -> Option<&AudioSampleBuffer> {
        self.take.as_deref()
    }

    /// A live monitor bound to this session's parameters.
    pub fn monitor(&self, sample_rate: u32) -> Result<LiveMonitor, SessionError> {
        Ok(LiveMonitor::new(
            sample_rate,
            self.params.clone(),
            self.impulse.as_deref(),
        )?)
    }

    /// The timing adjustment used for previews and the final mix.
    pub fn timing(&self) -> TimingAdjustment {
        self.timing
    }

    /// Adopt a new timing adjustment, usually `TimingMixer::adjustment()`
    /// after the user has finished nudging the preview.
    pub fn set_timing(&mut self, adjustment: TimingAdjustment) {
        self.timing = adjustment;
    }

    /// A preview mixer seeded with the session's timing adjustment.
    pub fn preview_mixer(&self, sample_rate: u32, channels: usize) -> TimingMixer {
        TimingMixer::new(sample_rate, channels, self.timing)
    }

    /// Snapshot the parameters and hand out a render of the current take.
    /// A render already in flight becomes stale.
    pub fn begin_render(&mut self) -> Result<PendingRender, SessionError> {
        self.require(
            "begin_render",
            &[SessionState::Stopped, SessionState::Ready, SessionState::Rendering],
        )?;
        let take = self.take.clone().ok_or(SessionError::InvalidState {
            operation: "begin_render",
            state: self.state,
        })?;

        if let Some((previous, _)) = &self.in_flight {
            log::debug!("render {} superseded", previous.value());
        } else {
            self.before_render = self.state;
        }
        self.next_ticket += 1;
        let ticket = RenderTicket(self.next_ticket);
        let alive = Arc::new(AtomicBool::new(true));
        self.in_flight = Some((ticket, Arc::clone(&alive)));
        self.state = SessionState::Rendering;

        Ok(PendingRender {
            ticket,
            take,
            snapshot: self.params.snapshot(),
            impulse: self.impulse.clone(),
            guard: InFlight(alive),
        })
    }

    /// Abandon the in-flight render. Returns `false` if `ticket` is not
    /// the newest one.
    pub fn cancel_render(&mut self, ticket: RenderTicket) -> bool {
        if self.in_flight.as_ref().map(|(t, _)| *t) != Some(ticket) {
            return false;
        }
        log::debug!("render {} cancelled", ticket.value());
        self.in_flight = None;
        self.state = self.before_render;
        true
    }

    /// Commit a finished render if it is still the newest one.
    pub fn complete_render(&mut self, done: CompletedRender) -> Result<&RenderedTake, SessionError> {
        if self.in_flight.as_ref().map(|(t, _)| *t) != Some(done.ticket) {
            log::warn!("discarding stale render {}", done.ticket.value());
            return Err(SessionError::StaleRender {
                ticket: done.ticket.value(),
            });
        }
        self.in_flight = None;

        match done.result {
            Ok(buffer) => {
                log::info!(
                    "render {} complete: {} frame(s), {} channel(s)",
                    done.ticket.value(),
                    buffer.len(),
                    buffer.channel_count()
                );
                self.renders.push(RenderedTake {
                    ticket: done.ticket,
                    snapshot: done.snapshot,
                    buffer,
                });
                self.state = SessionState::Ready;
                self.latest_render().ok_or(SessionError::NothingRendered)
            }
            Err(e) => {
                log::warn!("render {} failed: {e}", done.ticket.value());
                self.state = self.before_render;
                Err(e.into())
            }
        }
    }

    /// Begin, run and commit a render on the calling thread.
    pub fn render(&mut self) -> Result<&RenderedTake, SessionError> {
        let pending = self.begin_render()?;
        let done = pending.run();
        self.complete_render(done)
    }

    pub fn renders(&self) -> &[RenderedTake] {
        &self.renders
    }

    pub fn latest_render(&self) -> Option<&RenderedTake> {
        self.renders.last()
    }

    /// Encode the latest render with the configured WAV format.
    pub fn export(&self) -> Result<EncodedArtifact, SessionError> {
        let latest = self.latest_render().ok_or(SessionError::NothingRendered)?;
        let artifact = WavEncoder::new(self.config.wav_format).encode(&latest.buffer)?;
        log::debug!("exported {} byte(s) of {}", artifact.len(), artifact.content_type);
        Ok(artifact)
    }

    pub fn upload_request(&self, title: impl Into<String>) -> Result<UploadRequest, SessionError> {
        Ok(UploadRequest::new(title, self.export()?))
    }

    /// Final-mix request for an uploaded take, from the current timing.
    pub fn final_mix_request(&self, recording_id: u64) -> FinalMixRequest {
        FinalMixRequest::new(recording_id, &self.timing)
    }

    /// Release the input device and return to `Idle`. Renders are kept.
    pub fn close(&mut self) {
        self.capture.release();
        self.in_flight = None;
        self.take = None;
        self.state = SessionState::Idle;
    }
}
