//! Session configuration, loaded from camelCase JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::DEFAULT_RING_BLOCKS;
use crate::codec::WavFormat;
use crate::dsp::mixer::TimingAdjustment;
use crate::params::EffectParameters;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a recording session needs before the first take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Where the host fetches the reverb impulse response from.
    pub impulse_response_url: Option<String>,
    pub normalize_impulse_response: bool,
    /// Capture ring capacity, in blocks of one render quantum.
    pub capture_ring_blocks: usize,
    pub wav_format: WavFormat,
    pub effects: EffectParameters,
    pub timing: TimingAdjustment,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            impulse_response_url: None,
            normalize_impulse_response: true,
            capture_ring_blocks: DEFAULT_RING_BLOCKS,
            wav_format: WavFormat::default(),
            effects: EffectParameters::default(),
            timing: TimingAdjustment::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture_ring_blocks == 0 {
            return Err(ConfigError::Invalid("captureRingBlocks must be at least 1".into()));
        }
        if self.impulse_response_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(ConfigError::Invalid("impulseResponseUrl is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(config.normalize_impulse_response);
        assert_eq!(config.effects.master_gain(), 1.0);
        assert_eq!(config.timing.vocal_gain(), 0.5);
    }

    #[test]
    fn nested_values_are_validated() {
        let config = SessionConfig::from_json(
            r#"{
                "impulseResponseUrl": "/audio/ir/hall.wav",
                "wavFormat": "int16",
                "effects": { "echoFeedback": 1.5, "reverbMix": 0.4 },
                "timing": { "delay": -0.5, "vocalGain": 0.8 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.impulse_response_url.as_deref(), Some("/audio/ir/hall.wav"));
        assert_eq!(config.wav_format, WavFormat::Int16);
        assert!(config.effects.echo_feedback() < 1.0);
        assert_eq!(config.effects.reverb_mix(), 0.4);
        assert_eq!(config.timing.delay(), -0.5);
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        assert!(matches!(SessionConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn zero_ring_is_invalid() {
        let err = SessionConfig::from_json(r#"{"captureRingBlocks": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn survives_json_round_trip() {
        let config = SessionConfig {
            impulse_response_url: Some("ir.wav".into()),
            ..SessionConfig::default()
        };
        let back = SessionConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
