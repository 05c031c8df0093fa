//! Codec boundary — WAV encoding of rendered takes and decoding of fetched assets.
//!
//! The core never implements a container format itself: WAV goes through
//! `hound`, MP3 (behind the `mp3` feature) through `minimp3`.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::AudioSampleBuffer;

/// Failure to fetch or decode an asset (impulse response, backing track).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("asset fetch failed: {0}")]
    Fetch(String),

    #[error("asset could not be decoded: {0}")]
    Decode(String),

    #[error("asset contains no audio")]
    Empty,

    #[error("unsupported audio container")]
    Unsupported,
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("nothing to encode: the buffer is empty")]
    Empty,

    #[error("wav encoder: {0}")]
    Wav(#[from] hound::Error),
}

/// Sample format of encoded WAV files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WavFormat {
    /// 32-bit IEEE float, lossless with respect to the render.
    #[default]
    Float32,
    /// 16-bit PCM, clamped to [-1, 1] before quantization.
    Int16,
}

/// Encoded bytes plus what a download or upload needs to label them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArtifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

impl EncodedArtifact {
    /// `stem` with this artifact's extension appended.
    pub fn file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.extension)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Turns a rendered buffer into a container.
pub trait Encoder {
    fn encode(&self, buffer: &AudioSampleBuffer) -> Result<EncodedArtifact, EncodeError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WavEncoder {
    pub format: WavFormat,
}

impl WavEncoder {
    pub fn new(format: WavFormat) -> Self {
        WavEncoder { format }
    }
}

impl Encoder for WavEncoder {
    fn encode(&self, buffer: &AudioSampleBuffer) -> Result<EncodedArtifact, EncodeError> {
        if buffer.is_empty() {
            return Err(EncodeError::Empty);
        }
        let spec = match self.format {
            WavFormat::Float32 => hound::WavSpec {
                channels: buffer.channel_count() as u16,
                sample_rate: buffer.sample_rate(),
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
            WavFormat::Int16 => hound::WavSpec {
                channels: buffer.channel_count() as u16,
                sample_rate: buffer.sample_rate(),
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for sample in buffer.to_interleaved() {
                match self.format {
                    WavFormat::Float32 => writer.write_sample(sample)?,
                    WavFormat::Int16 => {
                        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?
                    }
                }
            }
            writer.finalize()?;
        }

        Ok(EncodedArtifact {
            bytes: cursor.into_inner(),
            content_type: "audio/wav",
            extension: "wav",
        })
    }
}

/// Decode fetched asset bytes. WAV is always available; MP3 needs the
/// `mp3` feature.
pub fn decode_audio(bytes: &[u8]) -> Result<AudioSampleBuffer, AssetError> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return decode_wav(bytes);
    }
    #[cfg(feature = "mp3")]
    {
        decode_mp3(bytes)
    }
    #[cfg(not(feature = "mp3"))]
    {
        Err(AssetError::Unsupported)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<AudioSampleBuffer, AssetError> {
    let decode_err = |e: hound::Error| AssetError::Decode(e.to_string());
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(decode_err)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
    };

    let buffer = AudioSampleBuffer::from_interleaved(&interleaved, spec.channels as usize, spec.sample_rate)
        .map_err(|e| AssetError::Decode(e.to_string()))?;
    if buffer.is_empty() {
        return Err(AssetError::Empty);
    }
    Ok(buffer)
}

#[cfg(feature = "mp3")]
fn decode_mp3(bytes: &[u8]) -> Result<AudioSampleBuffer, AssetError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut interleaved = Vec::new();
    let mut format: Option<(usize, u32)> = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let frame_format = (frame.channels, frame.sample_rate as u32);
                match format {
                    None => format = Some(frame_format),
                    Some(f) if f != frame_format => {
                        return Err(AssetError::Decode(
                            "mp3 stream changes format mid-stream".into(),
                        ));
                    }
                    Some(_) => {}
                }
                interleaved.extend(frame.data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(AssetError::Decode(e.to_string())),
        }
    }

    let (channels, sample_rate) = format.ok_or(AssetError::Unsupported)?;
    let buffer = AudioSampleBuffer::from_interleaved(&interleaved, channels, sample_rate)
        .map_err(|e| AssetError::Decode(e.to_string()))?;
    if buffer.is_empty() {
        return Err(AssetError::Empty);
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> AudioSampleBuffer {
        AudioSampleBuffer::from_channels(vec![vec![0.0, 0.5, -0.25], vec![1.0, -1.0, 0.125]], 22050)
            .unwrap()
    }

    #[test]
    fn float_wav_header_and_payload() {
        let artifact = WavEncoder::default().encode(&stereo()).unwrap();
        let wav = &artifact.bytes;
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(artifact.content_type, "audio/wav");
        assert_eq!(artifact.file_name("take"), "take.wav");

        let decoded = decode_audio(wav).unwrap();
        assert_eq!(decoded, stereo());
    }

    #[test]
    fn int16_wav_decodes_within_quantization() {
        let artifact = WavEncoder::new(WavFormat::Int16).encode(&stereo()).unwrap();
        let decoded = decode_audio(&artifact.bytes).unwrap();
        assert_eq!(decoded.sample_rate(), 22050);
        assert_eq!(decoded.channel_count(), 2);
        for (a, b) in decoded.channels().iter().flatten().zip(stereo().channels().iter().flatten()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn int16_clamps_out_of_range() {
        let hot = AudioSampleBuffer::mono(vec![3.0, -3.0], 8000);
        let artifact = WavEncoder::new(WavFormat::Int16).encode(&hot).unwrap();
        let decoded = decode_audio(&artifact.bytes).unwrap();
        let ch = decoded.channel(0).unwrap();
        assert!(ch[0] <= 1.0 && ch[0] > 0.99);
        assert!(ch[1] >= -1.0 && ch[1] < -0.99);
    }

    #[test]
    fn empty_buffer_is_not_encoded() {
        let err = WavEncoder::default()
            .encode(&AudioSampleBuffer::mono(vec![], 44100))
            .unwrap_err();
        assert!(matches!(err, EncodeError::Empty));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_audio(b"definitely not audio").is_err());
        let truncated = b"RIFF\0\0\0\0WAVEfmt ";
        assert!(matches!(decode_audio(truncated), Err(AssetError::Decode(_))));
    }
}
