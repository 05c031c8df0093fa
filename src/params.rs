//! Effect parameters — the knobs shared by the live and offline graphs.
//!
//! `EffectParameters` is a plain value: every constructor, setter and
//! deserialization path runs it through [`EffectParameters::validated`],
//! so a value that exists is always in range. `SharedParameters` holds the
//! same fields as atomics for the live graph, which reads them once per
//! render quantum.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Upper bound for the echo delay line, in seconds.
pub const MAX_ECHO_DELAY: f32 = 5.0;

/// Echo feedback is clamped to this value so the delay loop always decays.
pub const MAX_ECHO_FEEDBACK: f32 = 0.95;

/// Nominal upper bound of the master gain slider. Larger values are allowed.
pub const NOMINAL_MAX_MASTER_GAIN: f32 = 2.0;

/// A complementary wet/dry gain pair. `wet + dry == 1` always.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WetDry {
    pub wet: f32,
    pub dry: f32,
}

impl WetDry {
    pub fn from_mix(mix: f32) -> Self {
        let wet = mix.clamp(0.0, 1.0);
        WetDry { wet, dry: 1.0 - wet }
    }
}

/// Unvalidated field values, as they arrive from JSON or JS.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawParameters {
    master_gain: f32,
    reverb_mix: f32,
    echo_delay: f32,
    echo_feedback: f32,
    echo_mix: f32,
}

impl Default for RawParameters {
    fn default() -> Self {
        let d = EffectParameters::default();
        RawParameters {
            master_gain: d.master_gain,
            reverb_mix: d.reverb_mix,
            echo_delay: d.echo_delay,
            echo_feedback: d.echo_feedback,
            echo_mix: d.echo_mix,
        }
    }
}

impl From<RawParameters> for EffectParameters {
    fn from(raw: RawParameters) -> Self {
        EffectParameters {
            master_gain: raw.master_gain,
            reverb_mix: raw.reverb_mix,
            echo_delay: raw.echo_delay,
            echo_feedback: raw.echo_feedback,
            echo_mix: raw.echo_mix,
        }
        .validated()
    }
}

impl From<EffectParameters> for RawParameters {
    fn from(p: EffectParameters) -> Self {
        RawParameters {
            master_gain: p.master_gain,
            reverb_mix: p.reverb_mix,
            echo_delay: p.echo_delay,
            echo_feedback: p.echo_feedback,
            echo_mix: p.echo_mix,
        }
    }
}

/// The full set of effect knobs, always within range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawParameters", into = "RawParameters")]
pub struct EffectParameters {
    master_gain: f32,
    reverb_mix: f32,
    echo_delay: f32,
    echo_feedback: f32,
    echo_mix: f32,
}

impl Default for EffectParameters {
    fn default() -> Self {
        EffectParameters {
            master_gain: 1.0,
            reverb_mix: 0.0,
            echo_delay: 0.25,
            echo_feedback: 0.3,
            echo_mix: 0.5,
        }
    }
}

/// Clamp `value` into `[lo, hi]`, replacing NaN with `fallback`.
fn sanitize(value: f32, lo: f32, hi: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(lo, hi)
    }
}

impl EffectParameters {
    /// Create parameters from raw values, clamping each one.
    pub fn new(master_gain: f32, reverb_mix: f32, echo_delay: f32, echo_feedback: f32, echo_mix: f32) -> Self {
        EffectParameters {
            master_gain,
            reverb_mix,
            echo_delay,
            echo_feedback,
            echo_mix,
        }
        .validated()
    }

    /// Bring every field into its legal range.
    pub fn validated(self) -> Self {
        let d = EffectParameters::default();
        EffectParameters {
            master_gain: sanitize(self.master_gain, 0.0, f32::MAX, d.master_gain),
            reverb_mix: sanitize(self.reverb_mix, 0.0, 1.0, d.reverb_mix),
            echo_delay: sanitize(self.echo_delay, 0.0, MAX_ECHO_DELAY, d.echo_delay),
            echo_feedback: sanitize(self.echo_feedback, 0.0, MAX_ECHO_FEEDBACK, d.echo_feedback),
            echo_mix: sanitize(self.echo_mix, 0.0, 1.0, d.echo_mix),
        }
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn reverb_mix(&self) -> f32 {
        self.reverb_mix
    }

    /// Echo delay time in seconds.
    pub fn echo_delay(&self) -> f32 {
        self.echo_delay
    }

    pub fn echo_feedback(&self) -> f32 {
        self.echo_feedback
    }

    pub fn echo_mix(&self) -> f32 {
        self.echo_mix
    }

    pub fn reverb(&self) -> WetDry {
        WetDry::from_mix(self.reverb_mix)
    }

    pub fn echo(&self) -> WetDry {
        WetDry::from_mix(self.echo_mix)
    }

    pub fn with_master_gain(mut self, gain: f32) -> Self {
        self.master_gain = gain;
        self.validated()
    }

    pub fn with_reverb_mix(mut self, mix: f32) -> Self {
        self.reverb_mix = mix;
        self.validated()
    }

    pub fn with_echo_delay(mut self, seconds: f32) -> Self {
        self.echo_delay = seconds;
        self.validated()
    }

    pub fn with_echo_feedback(mut self, feedback: f32) -> Self {
        self.echo_feedback = feedback;
        self.validated()
    }

    pub fn with_echo_mix(mut self, mix: f32) -> Self {
        self.echo_mix = mix;
        self.validated()
    }
}

/// Slider bounds for every knob, as `(min, max)` pairs. Master gain is
/// unbounded above; its pair gives the nominal slider end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRanges {
    pub master_gain: (f32, f32),
    pub reverb_mix: (f32, f32),
    pub echo_delay: (f32, f32),
    pub echo_feedback: (f32, f32),
    pub echo_mix: (f32, f32),
}

impl ParameterRanges {
    pub const DEFAULT: ParameterRanges = ParameterRanges {
        master_gain: (0.0, NOMINAL_MAX_MASTER_GAIN),
        reverb_mix: (0.0, 1.0),
        echo_delay: (0.0, MAX_ECHO_DELAY),
        echo_feedback: (0.0, MAX_ECHO_FEEDBACK),
        echo_mix: (0.0, 1.0),
    };

    /// Whether every field of `p` lies inside its slider range.
    pub fn contains(&self, p: &EffectParameters) -> bool {
        let within = |(lo, hi): (f32, f32), v: f32| (lo..=hi).contains(&v);
        within(self.master_gain, p.master_gain)
            && within(self.reverb_mix, p.reverb_mix)
            && within(self.echo_delay, p.echo_delay)
            && within(self.echo_feedback, p.echo_feedback)
            && within(self.echo_mix, p.echo_mix)
    }
}

impl Default for ParameterRanges {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Anything a graph can pull its parameters from once per quantum.
pub trait ParameterSource {
    fn current(&self) -> EffectParameters;
}

/// A snapshot is its own source: the values never change.
impl ParameterSource for EffectParameters {
    fn current(&self) -> EffectParameters {
        *self
    }
}

/// Lock-free parameter cells, written by the UI and read by the live graph.
#[derive(Debug)]
struct ParameterCells {
    master_gain: AtomicU32,
    reverb_mix: AtomicU32,
    echo_delay: AtomicU32,
    echo_feedback: AtomicU32,
    echo_mix: AtomicU32,
}

fn cell(value: f32) -> AtomicU32 {
    AtomicU32::new(value.to_bits())
}

fn load(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

/// Live-bound parameters. Cloning shares the same cells.
#[derive(Debug, Clone)]
pub struct SharedParameters {
    cells: Arc<ParameterCells>,
}

impl Default for SharedParameters {
    fn default() -> Self {
        Self::new(EffectParameters::default())
    }
}

impl SharedParameters {
    pub fn new(initial: EffectParameters) -> Self {
        let p = initial.validated();
        SharedParameters {
            cells: Arc::new(ParameterCells {
                master_gain: cell(p.master_gain),
                reverb_mix: cell(p.reverb_mix),
                echo_delay: cell(p.echo_delay),
                echo_feedback: cell(p.echo_feedback),
                echo_mix: cell(p.echo_mix),
            }),
        }
    }

    /// Copy the current values out by value.
    pub fn snapshot(&self) -> EffectParameters {
        let c = &self.cells;
        EffectParameters {
            master_gain: load(&c.master_gain),
            reverb_mix: load(&c.reverb_mix),
            echo_delay: load(&c.echo_delay),
            echo_feedback: load(&c.echo_feedback),
            echo_mix: load(&c.echo_mix),
        }
    }

    /// Replace every value at once.
    pub fn store(&self, params: EffectParameters) {
        let p = params.validated();
        let c = &self.cells;
        c.master_gain.store(p.master_gain.to_bits(), Ordering::Relaxed);
        c.reverb_mix.store(p.reverb_mix.to_bits(), Ordering::Relaxed);
        c.echo_delay.store(p.echo_delay.to_bits(), Ordering::Relaxed);
        c.echo_feedback.store(p.echo_feedback.to_bits(), Ordering::Relaxed);
        c.echo_mix.store(p.echo_mix.to_bits(), Ordering::Relaxed);
    }

    /// Apply an edit to the current values and store the validated result.
    pub fn update(&self, edit: impl FnOnce(EffectParameters) -> EffectParameters) {
        self.store(edit(self.snapshot()));
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.update(|p| p.with_master_gain(gain));
    }

    pub fn set_reverb_mix(&self, mix: f32) {
        self.update(|p| p.with_reverb_mix(mix));
    }

    pub fn set_echo_delay(&self, seconds: f32) {
        self.update(|p| p.with_echo_delay(seconds));
    }

    pub fn set_echo_feedback(&self, feedback: f32) {
        self.update(|p| p.with_echo_feedback(feedback));
    }

    pub fn set_echo_mix(&self, mix: f32) {
        self.update(|p| p.with_echo_mix(mix));
    }
}

impl ParameterSource for SharedParameters {
    fn current(&self) -> EffectParameters {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_at_or_above_one_is_clamped() {
        for attempt in [0.99, 1.0, 1.5, f32::INFINITY] {
            let p = EffectParameters::default().with_echo_feedback(attempt);
            assert!(p.echo_feedback() < 1.0, "feedback {attempt} leaked through");
            assert_eq!(p.echo_feedback(), MAX_ECHO_FEEDBACK);
        }
    }

    #[test]
    fn wet_dry_pairs_are_complementary() {
        let mut p = EffectParameters::default();
        for step in 0..=20 {
            let mix = step as f32 * 0.07 - 0.2;
            p = p.with_reverb_mix(mix).with_echo_mix(1.0 - mix);
            let r = p.reverb();
            let e = p.echo();
            assert!((r.wet + r.dry - 1.0).abs() < 1e-6);
            assert!((e.wet + e.dry - 1.0).abs() < 1e-6);
            assert!((0.0..=1.0).contains(&r.wet));
        }
    }

    #[test]
    fn nan_falls_back_to_default() {
        let p = EffectParameters::new(f32::NAN, 0.2, f32::NAN, 0.1, 0.4);
        assert_eq!(p.master_gain(), 1.0);
        assert_eq!(p.echo_delay(), 0.25);
        assert_eq!(p.reverb_mix(), 0.2);
    }

    #[test]
    fn delay_is_bounded() {
        assert_eq!(EffectParameters::default().with_echo_delay(12.0).echo_delay(), MAX_ECHO_DELAY);
        assert_eq!(EffectParameters::default().with_echo_delay(-1.0).echo_delay(), 0.0);
    }

    #[test]
    fn deserialize_validates() {
        let p: EffectParameters =
            serde_json::from_str(r#"{"masterGain": -3.0, "echoFeedback": 4.0}"#).unwrap();
        assert_eq!(p.master_gain(), 0.0);
        assert_eq!(p.echo_feedback(), MAX_ECHO_FEEDBACK);
        assert_eq!(p.echo_mix(), 0.5);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(EffectParameters::default()).unwrap();
        assert_eq!(json["echoDelay"], 0.25);
        assert_eq!(json["reverbMix"], 0.0);
    }

    #[test]
    fn slider_ranges_cover_defaults() {
        let ranges = ParameterRanges::default();
        assert!(ranges.contains(&EffectParameters::default()));
        assert!(ranges.echo_feedback.1 < 1.0);
        assert!(!ranges.contains(&EffectParameters::default().with_master_gain(3.0)));
        let json = serde_json::to_value(ranges).unwrap();
        assert_eq!(json["masterGain"][1], 2.0);
        assert_eq!(json["echoDelay"][1], 5.0);
    }

    #[test]
    fn snapshot_is_detached_from_live_cells() {
        let live = SharedParameters::default();
        let snap = live.snapshot();
        live.set_master_gain(1.7);
        live.set_echo_feedback(2.0);
        assert_eq!(snap.master_gain(), 1.0);
        assert_eq!(live.snapshot().master_gain(), 1.7);
        assert_eq!(live.snapshot().echo_feedback(), MAX_ECHO_FEEDBACK);
    }

    #[test]
    fn clones_share_cells() {
        let a = SharedParameters::default();
        let b = a.clone();
        b.set_reverb_mix(0.8);
        assert_eq!(a.current().reverb_mix(), 0.8);
    }
}
