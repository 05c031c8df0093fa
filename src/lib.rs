pub mod buffer;
pub mod capture;
pub mod codec;
pub mod config;
pub mod dsp;
pub mod error;
pub mod params;
pub mod remote;
pub mod session;

use wasm_bindgen::prelude::*;

use crate::buffer::AudioSampleBuffer;
use crate::codec::{Encoder, WavEncoder, WavFormat};
use crate::dsp::convolver::ImpulseResponse;
use crate::dsp::mixer::{PreviewPlan, TimingAdjustment};
use crate::error::SessionError;
use crate::params::{EffectParameters, ParameterRanges};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Render a mono take through the effect chain.
///
/// `impulse` is an optional mono impulse response with its own rate; an
/// empty one counts as missing and the reverb runs dry.
pub fn render_take(
    samples: Vec<f32>,
    sample_rate: u32,
    params: EffectParameters,
    impulse: Option<(Vec<f32>, u32)>,
) -> Result<AudioSampleBuffer, SessionError> {
    let take = AudioSampleBuffer::from_channels(vec![samples], sample_rate)?;
    let impulse = match impulse {
        Some((data, rate)) if !data.is_empty() => {
            let buffer = AudioSampleBuffer::from_channels(vec![data], rate)?;
            Some(ImpulseResponse::new(buffer, true)?)
        }
        _ => None,
    };
    Ok(dsp::renderer::render(&take, params, impulse.as_ref())?)
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Read parameters from JS; `undefined` or `null` means defaults.
fn params_from_js(value: JsValue) -> Result<EffectParameters, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(EffectParameters::default());
    }
    serde_wasm_bindgen::from_value(value).map_err(js_err)
}

fn impulse_arg(impulse: Option<Vec<f32>>, impulse_rate: u32) -> Option<(Vec<f32>, u32)> {
    impulse.map(|data| (data, impulse_rate))
}

/// WASM-exposed: return the take_studio_core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: default effect parameters as a camelCase object.
#[wasm_bindgen]
pub fn default_parameters() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&EffectParameters::default()).map_err(js_err)
}

/// WASM-exposed: `(min, max)` slider bounds for each effect knob.
#[wasm_bindgen]
pub fn parameter_ranges() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&ParameterRanges::DEFAULT).map_err(js_err)
}

/// WASM-exposed: render a mono take to interleaved f32 samples.
#[wasm_bindgen]
pub fn render_take_samples(
    samples: Vec<f32>,
    sample_rate: u32,
    params: JsValue,
    impulse: Option<Vec<f32>>,
    impulse_rate: u32,
) -> Result<Vec<f32>, JsValue> {
    let params = params_from_js(params)?;
    let rendered = render_take(samples, sample_rate, params, impulse_arg(impulse, impulse_rate))
        .map_err(js_err)?;
    Ok(rendered.to_interleaved())
}

/// WASM-exposed: render a mono take straight to WAV bytes.
/// `int16` selects 16-bit PCM instead of 32-bit float.
#[wasm_bindgen]
pub fn render_take_wav(
    samples: Vec<f32>,
    sample_rate: u32,
    params: JsValue,
    impulse: Option<Vec<f32>>,
    impulse_rate: u32,
    int16: bool,
) -> Result<Vec<u8>, JsValue> {
    let params = params_from_js(params)?;
    let rendered = render_take(samples, sample_rate, params, impulse_arg(impulse, impulse_rate))
        .map_err(js_err)?;
    let format = if int16 { WavFormat::Int16 } else { WavFormat::Float32 };
    let artifact = WavEncoder::new(format).encode(&rendered).map_err(js_err)?;
    Ok(artifact.bytes)
}

/// WASM-exposed: schedule of a vocal/backing preview starting at `reference`.
#[wasm_bindgen]
pub fn plan_preview(
    reference: f64,
    vocal_duration: f64,
    backing_duration: f64,
    adjustment: JsValue,
) -> Result<JsValue, JsValue> {
    let adjustment: TimingAdjustment = if adjustment.is_undefined() || adjustment.is_null() {
        TimingAdjustment::default()
    } else {
        serde_wasm_bindgen::from_value(adjustment).map_err(js_err)?
    };
    let plan = PreviewPlan::new(reference, vocal_duration, backing_duration, &adjustment);
    serde_wasm_bindgen::to_value(&plan).map_err(js_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_take_without_impulse() {
        let out = render_take(vec![0.5; 1000], 8000, EffectParameters::default(), None).unwrap();
        assert_eq!(out.len(), 1000);
        assert_eq!(out.sample_rate(), 8000);
    }

    #[test]
    fn empty_impulse_counts_as_missing() {
        let params = EffectParameters::default().with_reverb_mix(1.0);
        let a = render_take(vec![0.5; 300], 8000, params, Some((vec![], 8000))).unwrap();
        let b = render_take(vec![0.5; 300], 8000, params, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn impulse_at_other_rate_is_accepted() {
        let params = EffectParameters::default().with_reverb_mix(0.5);
        let out = render_take(vec![0.5; 300], 8000, params, Some((vec![1.0, 0.3, 0.1], 16000))).unwrap();
        assert_eq!(out.len(), 300);
    }

    #[test]
    fn empty_take_is_an_error() {
        let err = render_take(vec![], 8000, EffectParameters::default(), None).unwrap_err();
        assert!(matches!(err, SessionError::Render(_)));
    }

    #[test]
    fn zero_rate_is_an_error() {
        let err = render_take(vec![0.1], 0, EffectParameters::default(), None).unwrap_err();
        assert!(matches!(err, SessionError::Buffer(_)));
    }

    #[test]
    fn gain_above_slider_range_still_renders() {
        let ranges = ParameterRanges::DEFAULT;
        let params = EffectParameters::default().with_master_gain(ranges.master_gain.1 * 2.0);
        assert!(!ranges.contains(&params));
        let out = render_take(vec![0.25; 256], 8000, params, None).unwrap();
        assert!(out.peak() > 0.25);
    }

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }
}
