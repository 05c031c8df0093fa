//! Remote boundary — take upload and the server-side final mix.
//!
//! The server owns persistence and the two-track mixdown. This module
//! only shapes what goes over the wire and reads the replies back. The
//! HTTP client lives behind the `remote` feature so the browser build
//! can hand requests to `fetch` instead. Impulse responses are fetched
//! over the same client.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::AudioSampleBuffer;
use crate::codec::{AssetError, EncodedArtifact, decode_audio};
use crate::dsp::mixer::TimingAdjustment;

/// Multipart field carrying the take title.
pub const TITLE_FIELD: &str = "recording[title]";
/// Multipart field carrying the encoded take.
pub const AUDIO_FIELD: &str = "recording[original_audio]";
pub const DELAY_FIELD: &str = "recording[recording_delay]";
pub const VOCAL_GAIN_FIELD: &str = "recording[vocal_gain]";

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected reply (HTTP {status}): {body}")]
    UnexpectedReply { status: u16, body: String },

    #[error("reply is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// An encoded take ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub title: String,
    pub file_name: String,
    pub artifact: EncodedArtifact,
}

impl UploadRequest {
    pub fn new(title: impl Into<String>, artifact: EncodedArtifact) -> Self {
        UploadRequest {
            title: title.into(),
            file_name: artifact.file_name("recording"),
            artifact,
        }
    }
}

/// What the server said about an upload. Validation messages are passed
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted { redirect_url: String },
    Rejected { errors: Vec<String> },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum UploadReply {
    Ok {
        redirect_url: String,
    },
    Error {
        #[serde(default)]
        errors: Vec<String>,
    },
}

impl UploadOutcome {
    pub fn from_reply_json(body: &str) -> Result<Self, RemoteError> {
        Ok(match serde_json::from_str::<UploadReply>(body)? {
            UploadReply::Ok { redirect_url } => UploadOutcome::Accepted { redirect_url },
            UploadReply::Error { errors } => UploadOutcome::Rejected { errors },
        })
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, UploadOutcome::Accepted { .. })
    }
}

/// Somewhere an encoded take can be stored.
pub trait ArtifactStore {
    fn upload(&self, request: UploadRequest) -> impl Future<Output = Result<UploadOutcome, RemoteError>>;
}

/// Server-side mix state of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixStatus {
    Created,
    Generating,
    Generated,
    Failed,
}

impl MixStatus {
    /// `true` once polling can stop.
    pub fn is_settled(&self) -> bool {
        matches!(self, MixStatus::Generated | MixStatus::Failed)
    }
}

/// Request for the server to mix an uploaded take with its backing track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FinalMixRequest {
    pub recording_id: u64,
    pub recording_delay: f64,
    pub vocal_gain: f32,
}

impl FinalMixRequest {
    /// Only a validated adjustment can produce a request.
    pub fn new(recording_id: u64, adjustment: &TimingAdjustment) -> Self {
        FinalMixRequest {
            recording_id,
            recording_delay: adjustment.delay(),
            vocal_gain: adjustment.vocal_gain(),
        }
    }

    /// Form fields as the server expects them.
    pub fn form_fields(&self) -> [(&'static str, String); 2] {
        [
            (DELAY_FIELD, self.recording_delay.to_string()),
            (VOCAL_GAIN_FIELD, self.vocal_gain.to_string()),
        ]
    }
}

pub trait MixService {
    fn request_mix(&self, request: FinalMixRequest) -> impl Future<Output = Result<MixStatus, RemoteError>>;
    fn mix_status(&self, recording_id: u64) -> impl Future<Output = Result<MixStatus, RemoteError>>;
}

/// Turn a fetched asset reply into audio. Any non-2xx status is a fetch
/// failure, whatever the body holds.
pub fn asset_from_reply(status: u16, body: &[u8]) -> Result<AudioSampleBuffer, AssetError> {
    if !(200..300).contains(&status) {
        return Err(AssetError::Fetch(format!("HTTP {status}")));
    }
    decode_audio(body)
}

#[cfg(feature = "remote")]
pub use http::HttpArtifactStore;

#[cfg(feature = "remote")]
mod http {
    use std::future::Future;

    use reqwest::multipart::{Form, Part};
    use serde::Deserialize;

    use super::*;

    fn transport(e: reqwest::Error) -> RemoteError {
        RemoteError::Transport(e.to_string())
    }

    /// The recordings endpoints of the web app, over HTTP.
    #[derive(Debug, Clone)]
    pub struct HttpArtifactStore {
        base_url: String,
        client: reqwest::Client,
    }

    #[derive(Deserialize)]
    struct StatusReply {
        status: MixStatus,
    }

    impl HttpArtifactStore {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self::with_client(base_url, reqwest::Client::new())
        }

        pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
            HttpArtifactStore {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                client,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base_url)
        }

        /// Fetch and decode an impulse response. Relative URLs resolve
        /// against the base URL.
        pub async fn fetch_impulse_response(&self, url: &str) -> Result<AudioSampleBuffer, AssetError> {
            let url = if url.contains("://") {
                url.to_string()
            } else if url.starts_with('/') {
                self.url(url)
            } else {
                self.url(&format!("/{url}"))
            };
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| AssetError::Fetch(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| AssetError::Fetch(e.to_string()))?;
            log::debug!("fetched {} byte(s) from {url} (HTTP {status})", body.len());
            asset_from_reply(status, &body)
        }
    }

    impl ArtifactStore for HttpArtifactStore {
        fn upload(&self, request: UploadRequest) -> impl Future<Output = Result<UploadOutcome, RemoteError>> {
            async move {
                let part = Part::bytes(request.artifact.bytes)
                    .file_name(request.file_name)
                    .mime_str(request.artifact.content_type)
                    .map_err(transport)?;
                let form = Form::new().text(TITLE_FIELD, request.title).part(AUDIO_FIELD, part);

                let response = self
                    .client
                    .post(self.url("/recordings"))
                    .header(reqwest::header::ACCEPT, "application/json")
                    .multipart(form)
                    .send()
                    .await
                    .map_err(transport)?;

                let status = response.status();
                let body = response.text().await.map_err(transport)?;
                // Validation failures come back as 422 with the same JSON shape.
                if status.is_success() || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
                    let outcome = UploadOutcome::from_reply_json(&body)?;
                    log::info!("upload finished: accepted = {}", outcome.is_accepted());
                    Ok(outcome)
                } else {
                    Err(RemoteError::UnexpectedReply {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
        }
    }

    impl MixService for HttpArtifactStore {
        fn request_mix(&self, request: FinalMixRequest) -> impl Future<Output = Result<MixStatus, RemoteError>> {
            async move {
                let response = self
                    .client
                    .post(self.url(&format!("/recordings/{}/generate_audio", request.recording_id)))
                    .form(&request.form_fields())
                    .send()
                    .await
                    .map_err(transport)?;
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    log::info!("final mix requested for recording {}", request.recording_id);
                    Ok(MixStatus::Generating)
                } else {
                    Err(RemoteError::UnexpectedReply {
                        status: status.as_u16(),
                        body: response.text().await.unwrap_or_default(),
                    })
                }
            }
        }

        fn mix_status(&self, recording_id: u64) -> impl Future<Output = Result<MixStatus, RemoteError>> {
            async move {
                let response = self
                    .client
                    .get(self.url(&format!("/recordings/{recording_id}")))
                    .header(reqwest::header::ACCEPT, "application/json")
                    .send()
                    .await
                    .map_err(transport)?;
                let status = response.status();
                let body = response.text().await.map_err(transport)?;
                if !status.is_success() {
                    return Err(RemoteError::UnexpectedReply {
                        status: status.as_u16(),
                        body,
                    });
                }
                Ok(serde_json::from_str::<StatusReply>(&body)?.status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reply_is_accepted() {
        let outcome = UploadOutcome::from_reply_json(r#"{"status":"ok","redirect_url":"/mypage"}"#).unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Accepted {
                redirect_url: "/mypage".into()
            }
        );
    }

    #[test]
    fn error_reply_keeps_messages_verbatim() {
        let outcome = UploadOutcome::from_reply_json(
            r#"{"status":"error","errors":["Title is too long (maximum is 255 characters)"]}"#,
        )
        .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Rejected {
                errors: vec!["Title is too long (maximum is 255 characters)".into()]
            }
        );
        assert!(!outcome.is_accepted());
    }

    #[test]
    fn unknown_reply_is_an_error() {
        assert!(UploadOutcome::from_reply_json(r#"{"status":"maybe"}"#).is_err());
        assert!(UploadOutcome::from_reply_json("<html>").is_err());
    }

    #[test]
    fn mix_request_carries_validated_adjustment() {
        let adj = TimingAdjustment::new(-42.0, 2.0);
        let req = FinalMixRequest::new(7, &adj);
        assert_eq!(req.recording_delay, -10.0);
        assert_eq!(req.vocal_gain, 1.0);
        let fields = req.form_fields();
        assert_eq!(fields[0], (DELAY_FIELD, "-10".to_string()));
        assert_eq!(fields[1], (VOCAL_GAIN_FIELD, "1".to_string()));
    }

    #[test]
    fn mix_status_wire_names() {
        let status: MixStatus = serde_json::from_str(r#""generating""#).unwrap();
        assert_eq!(status, MixStatus::Generating);
        assert!(!status.is_settled());
        assert!(MixStatus::Generated.is_settled());
        assert!(MixStatus::Failed.is_settled());
        assert!(!MixStatus::Created.is_settled());
    }

    #[test]
    fn missing_asset_is_a_fetch_error() {
        let err = asset_from_reply(404, b"<h1>Not Found</h1>").unwrap_err();
        assert_eq!(err, AssetError::Fetch("HTTP 404".into()));
        assert!(asset_from_reply(200, b"not audio").is_err());
    }

    #[test]
    fn fetched_wav_decodes() {
        use crate::codec::{Encoder, WavEncoder, WavFormat};
        let ir = AudioSampleBuffer::mono(vec![1.0, 0.5, 0.25], 8000);
        let wav = WavEncoder::new(WavFormat::Float32).encode(&ir).unwrap();
        let decoded = asset_from_reply(200, &wav.bytes).unwrap();
        assert_eq!(decoded, ir);
    }

    #[test]
    fn upload_request_names_file_after_format() {
        let artifact = EncodedArtifact {
            bytes: vec![1, 2, 3],
            content_type: "audio/wav",
            extension: "wav",
        };
        let req = UploadRequest::new("first take", artifact);
        assert_eq!(req.file_name, "recording.wav");
        assert_eq!(req.title, "first take");
    }
}
