//! Timing mixer — previews a take against a backing track with an offset and balance.
//!
//! Both sources are scheduled against one reference time. The backing
//! track always starts at the reference. A positive delay pushes the vocal
//! start later; a negative delay starts the vocal at the reference but
//! skips `|delay|` seconds into its own buffer. The preview stops on
//! request, on any adjustment change, or once the longer of the two
//! sources has finished.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::AudioSampleBuffer;

/// Largest timing offset accepted either way, in seconds.
pub const MAX_TIMING_OFFSET: f64 = 10.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MixerError {
    #[error("the {0} track has no audio")]
    EmptyTrack(TrackRole),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackRole {
    Vocal,
    Backing,
}

impl std::fmt::Display for TrackRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackRole::Vocal => write!(f, "vocal"),
            TrackRole::Backing => write!(f, "backing"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTiming {
    delay: f64,
    vocal_gain: f32,
}

impl Default for RawTiming {
    fn default() -> Self {
        RawTiming {
            delay: 0.0,
            vocal_gain: 0.5,
        }
    }
}

impl From<RawTiming> for TimingAdjustment {
    fn from(raw: RawTiming) -> Self {
        TimingAdjustment::new(raw.delay, raw.vocal_gain)
    }
}

impl From<TimingAdjustment> for RawTiming {
    fn from(t: TimingAdjustment) -> Self {
        RawTiming {
            delay: t.delay,
            vocal_gain: t.vocal_gain,
        }
    }
}

/// Signed vocal offset and vocal/backing balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTiming", into = "RawTiming")]
pub struct TimingAdjustment {
    delay: f64,
    vocal_gain: f32,
}

impl Default for TimingAdjustment {
    fn default() -> Self {
        RawTiming::default().into()
    }
}

impl TimingAdjustment {
    /// `delay` in seconds (negative: vocal earlier), `vocal_gain` in [0, 1].
    pub fn new(delay: f64, vocal_gain: f32) -> Self {
        let delay = if delay.is_finite() {
            delay.clamp(-MAX_TIMING_OFFSET, MAX_TIMING_OFFSET)
        } else {
            0.0
        };
        let vocal_gain = if vocal_gain.is_nan() { 0.5 } else { vocal_gain.clamp(0.0, 1.0) };
        TimingAdjustment { delay, vocal_gain }
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn vocal_gain(&self) -> f32 {
        self.vocal_gain
    }

    pub fn backing_gain(&self) -> f32 {
        1.0 - self.vocal_gain
    }

    pub fn with_delay(self, delay: f64) -> Self {
        Self::new(delay, self.vocal_gain)
    }

    pub fn with_vocal_gain(self, gain: f32) -> Self {
        Self::new(self.delay, gain)
    }
}

/// When and how one source plays, in context seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSchedule {
    /// Context time at which playback starts.
    pub start_at: f64,
    /// Position inside the source buffer where playback begins.
    pub offset: f64,
    pub gain: f32,
}

/// The full schedule of one preview.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewPlan {
    pub reference: f64,
    pub vocal: SourceSchedule,
    pub backing: SourceSchedule,
    /// Context time of the automatic stop.
    pub stop_at: f64,
}

impl PreviewPlan {
    pub fn new(
        reference: f64,
        vocal_duration: f64,
        backing_duration: f64,
        adjustment: &TimingAdjustment,
    ) -> Self {
        let delay = adjustment.delay();
        let vocal = SourceSchedule {
            start_at: reference + delay.max(0.0),
            offset: if delay < 0.0 { delay.abs() } else { 0.0 },
            gain: adjustment.vocal_gain(),
        };
        let backing = SourceSchedule {
            start_at: reference,
            offset: 0.0,
            gain: adjustment.backing_gain(),
        };
        let duration = (vocal_duration + delay.max(0.0)).max(backing_duration);
        PreviewPlan {
            reference,
            vocal,
            backing,
            stop_at: reference + duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerState {
    Idle,
    Previewing,
}

/// A scheduled source resolved to frames.
#[derive(Debug)]
struct ActiveSource {
    buffer: Arc<AudioSampleBuffer>,
    start: u64,
    offset: usize,
    gain: f32,
}

impl ActiveSource {
    fn new(buffer: Arc<AudioSampleBuffer>, schedule: &SourceSchedule, sample_rate: u32) -> Self {
        let rate = sample_rate as f64;
        ActiveSource {
            buffer,
            start: (schedule.start_at * rate).round() as u64,
            offset: (schedule.offset * rate).round() as usize,
            gain: schedule.gain,
        }
    }

    #[inline]
    fn sample(&self, at: u64, channel: usize) -> f32 {
        if at < self.start {
            return 0.0;
        }
        let index = self.offset + (at - self.start) as usize;
        let c = channel.min(self.buffer.channel_count() - 1);
        self.buffer
            .channel(c)
            .and_then(|data| data.get(index))
            .map_or(0.0, |&s| s * self.gain)
    }
}

#[derive(Debug)]
struct Preview {
    plan: PreviewPlan,
    vocal: ActiveSource,
    backing: ActiveSource,
    stop: u64,
}

/// Two-source preview player driven by its own sample clock.
#[derive(Debug)]
pub struct TimingMixer {
    sample_rate: u32,
    channels: usize,
    clock: u64,
    adjustment: TimingAdjustment,
    preview: Option<Preview>,
}

impl TimingMixer {
    pub fn new(sample_rate: u32, channels: usize, adjustment: TimingAdjustment) -> Self {
        TimingMixer {
            sample_rate,
            channels: channels.max(1),
            clock: 0,
            adjustment,
            preview: None,
        }
    }

    pub fn state(&self) -> MixerState {
        if self.preview.is_some() {
            MixerState::Previewing
        } else {
            MixerState::Idle
        }
    }

    pub fn adjustment(&self) -> TimingAdjustment {
        self.adjustment
    }

    /// Current context time in seconds.
    pub fn current_time(&self) -> f64 {
        self.clock as f64 / self.sample_rate as f64
    }

    /// The plan of the running preview, if any.
    pub fn plan(&self) -> Option<&PreviewPlan> {
        self.preview.as_ref().map(|p| &p.plan)
    }

    /// Start a preview at the current time, replacing any running one.
    pub fn preview(
        &mut self,
        vocal: Arc<AudioSampleBuffer>,
        backing: Arc<AudioSampleBuffer>,
    ) -> Result<PreviewPlan, MixerError> {
        self.stop();
        if vocal.is_empty() {
            return Err(MixerError::EmptyTrack(TrackRole::Vocal));
        }
        if backing.is_empty() {
            return Err(MixerError::EmptyTrack(TrackRole::Backing));
        }
        let vocal = self.at_mixer_rate(vocal);
        let backing = self.at_mixer_rate(backing);

        let plan = PreviewPlan::new(
            self.current_time(),
            vocal.duration(),
            backing.duration(),
            &self.adjustment,
        );
        let rate = self.sample_rate;
        self.preview = Some(Preview {
            vocal: ActiveSource::new(vocal, &plan.vocal, rate),
            backing: ActiveSource::new(backing, &plan.backing, rate),
            stop: (plan.stop_at * rate as f64).round() as u64,
            plan,
        });
        log::debug!(
            "preview started: delay {:.3}s, vocal gain {:.2}, stops at {:.3}s",
            self.adjustment.delay(),
            self.adjustment.vocal_gain(),
            plan.stop_at
        );
        Ok(plan)
    }

    fn at_mixer_rate(&self, buffer: Arc<AudioSampleBuffer>) -> Arc<AudioSampleBuffer> {
        if buffer.sample_rate() == self.sample_rate {
            buffer
        } else {
            Arc::new(buffer.resampled(self.sample_rate))
        }
    }

    /// Stop and drop both sources immediately.
    pub fn stop(&mut self) {
        if self.preview.take().is_some() {
            log::debug!("preview stopped at {:.3}s", self.current_time());
        }
    }

    /// Change the adjustment. A running preview is stopped so what is
    /// heard never drifts from the current values.
    pub fn set_adjustment(&mut self, adjustment: TimingAdjustment) {
        self.adjustment = adjustment;
        self.stop();
    }

    pub fn set_delay(&mut self, delay: f64) {
        self.set_adjustment(self.adjustment.with_delay(delay));
    }

    pub fn set_vocal_gain(&mut self, gain: f32) {
        self.set_adjustment(self.adjustment.with_vocal_gain(gain));
    }

    /// Fill interleaved `output` and advance the clock. When the clock
    /// passes the scheduled stop, the preview ends.
    pub fn process(&mut self, output: &mut [f32]) {
        let channels = self.channels;
        let frames = output.len() / channels;
        match &self.preview {
            Some(p) => {
                for (i, frame) in output.chunks_exact_mut(channels).enumerate() {
                    let t = self.clock + i as u64;
                    for (c, slot) in frame.iter_mut().enumerate() {
                        *slot = p.vocal.sample(t, c) + p.backing.sample(t, c);
                    }
                }
            }
            None => output.fill(0.0),
        }
        self.clock += frames as u64;

        if self.preview.as_ref().is_some_and(|p| self.clock >= p.stop) {
            self.stop();
        }
    }
}
