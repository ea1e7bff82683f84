//! Reflection upload
//!
//! Packages a finished recording as a multipart file part and posts it to
//! the create-reflection endpoint. Raw PCM from the microphone is wrapped in
//! a WAV container first; encoded formats are sent as-is.

use crate::config::ApiConfig;
use crate::recorder::FinishedArtifact;
use chrono::{DateTime, Utc};
use hound::{SampleFormat, WavSpec, WavWriter};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

/// Form field carrying the recording
pub const AUDIO_FIELD: &str = "audio_file";

/// Errors raised while uploading a recording
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unsupported media type: {0}")]
    InvalidMediaType(String),

    #[error("Recording is empty")]
    EmptyRecording,

    #[error("Recording of {0} bytes does not fit in a WAV container")]
    TooLarge(usize),

    #[error("PCM payload of {0} bytes is not a whole number of frames")]
    PartialFrame(usize),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

/// Reflection created from an uploaded recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub id: i64,
    #[serde(default)]
    pub audio_file: Option<String>,
    #[serde(default)]
    pub transcription: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// File part ready for a multipart form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PcmFormat {
    sample_rate: u32,
    channels: u16,
}

impl PcmFormat {
    /// Parse `audio/L16;rate=<hz>;channels=<n>`. Returns `None` for other types.
    fn parse(media_type: &str) -> Result<Option<Self>, UploadError> {
        let mut params = media_type.split(';').map(str::trim);
        let essence = params.next().unwrap_or_default();
        if !essence.eq_ignore_ascii_case("audio/L16") {
            return Ok(None);
        }

        let invalid = || UploadError::InvalidMediaType(media_type.to_string());
        let mut sample_rate = None;
        let mut channels = 1u16;
        for param in params {
            match param.split_once('=') {
                Some(("rate", value)) => sample_rate = Some(value.parse().map_err(|_| invalid())?),
                Some(("channels", value)) => channels = value.parse().map_err(|_| invalid())?,
                _ => {}
            }
        }

        let sample_rate = sample_rate.ok_or_else(invalid)?;
        if sample_rate == 0 || channels == 0 {
            return Err(invalid());
        }
        Ok(Some(Self {
            sample_rate,
            channels,
        }))
    }
}

/// Build the multipart file part for an artifact
pub fn package_artifact(artifact: &FinishedArtifact) -> Result<UploadPart, UploadError> {
    if artifact.is_empty() {
        return Err(UploadError::EmptyRecording);
    }

    let media_type = artifact.media_type();
    if let Some(format) = PcmFormat::parse(media_type)? {
        return Ok(UploadPart {
            file_name: "recording.wav".to_string(),
            mime_type: "audio/wav".to_string(),
            bytes: wav_bytes(artifact.bytes(), format)?,
        });
    }

    let essence = media_type.split(';').next().unwrap_or_default().trim();
    let extension = essence
        .split_once('/')
        .map(|(_, subtype)| subtype)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| UploadError::InvalidMediaType(media_type.to_string()))?;

    Ok(UploadPart {
        file_name: format!("recording.{}", extension),
        mime_type: essence.to_string(),
        bytes: artifact.bytes().to_vec(),
    })
}

/// Size of the RIFF `data` chunk; the whole file length must also fit in 32 bits
fn data_chunk_size(len: usize) -> Result<u32, UploadError> {
    u32::try_from(len)
        .ok()
        .filter(|size| size.checked_add(36).is_some())
        .ok_or(UploadError::TooLarge(len))
}

/// Wrap 16-bit little-endian PCM in a RIFF/WAVE container
fn wav_bytes(pcm: &[u8], format: PcmFormat) -> Result<Vec<u8>, UploadError> {
    let data_size = data_chunk_size(pcm.len())?;
    let frame_bytes = usize::from(format.channels) * 2;
    if pcm.len() % frame_bytes != 0 {
        return Err(UploadError::PartialFrame(pcm.len()));
    }

    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for sample in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
    }
    writer.finalize()?;

    tracing::debug!(
        "Wrapped {} PCM bytes as {}Hz/{}ch WAV",
        data_size,
        format.sample_rate,
        format.channels
    );
    Ok(cursor.into_inner())
}

/// Client for the reflections API
pub struct ReflectionClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ReflectionClient {
    pub fn new(config: &ApiConfig) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    /// Override the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/reflections/", self.base_url)
    }

    /// Upload a recording and return the created reflection
    pub async fn create_reflection(
        &self,
        artifact: &FinishedArtifact,
    ) -> Result<Reflection, UploadError> {
        let part = package_artifact(artifact)?;
        let endpoint = self.endpoint();

        tracing::info!(
            "Uploading {} ({} bytes, {}s) to {}",
            part.file_name,
            part.bytes.len(),
            artifact.duration_seconds(),
            endpoint
        );

        let file = multipart::Part::bytes(part.bytes)
            .file_name(part.file_name)
            .mime_str(&part.mime_type)?;
        let form = multipart::Form::new().part(AUDIO_FIELD, file);

        let mut request = self.client.post(&endpoint).multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Upload rejected with {}: {}", status, body);
            return Err(UploadError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reflection: Reflection = response.json().await?;
        tracing::info!("Reflection {} created", reflection.id);
        Ok(reflection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_config(server: &MockServer, token: Option<&str>) -> ApiConfig {
        ApiConfig {
            base_url: format!("{}/api/", server.uri()),
            token: token.map(str::to_string),
            timeout_secs: 5,
        }
    }

    fn reflection_body() -> serde_json::Value {
        json!({
            "id": 12,
            "audio_file": "/media/reflections/recording.webm",
            "transcription": null,
            "ai_summary": null,
            "keywords": [],
            "created_at": "2026-10-18T09:30:00Z",
            "updated_at": "2026-10-18T09:30:00Z"
        })
    }

    #[test]
    fn test_pcm_is_wrapped_in_wav() {
        let pcm = [1, 0, 2, 0, 0xff, 0xff, 0, 0x80];
        let artifact = FinishedArtifact::new(pcm.to_vec(), "audio/L16;rate=48000;channels=2", 1, 1);
        let part = package_artifact(&artifact).unwrap();

        assert_eq!(part.file_name, "recording.wav");
        assert_eq!(part.mime_type, "audio/wav");
        assert_eq!(&part.bytes[0..4], b"RIFF");
        assert_eq!(&part.bytes[8..12], b"WAVE");
        assert_eq!(&part.bytes[12..16], b"fmt ");
        assert_eq!(u16::from_le_bytes([part.bytes[22], part.bytes[23]]), 2);
        assert_eq!(
            u32::from_le_bytes([part.bytes[24], part.bytes[25], part.bytes[26], part.bytes[27]]),
            48_000
        );
        assert_eq!(&part.bytes[part.bytes.len() - pcm.len()..], &pcm);

        let riff_size = u32::from_le_bytes([part.bytes[4], part.bytes[5], part.bytes[6], part.bytes[7]]);
        assert_eq!(riff_size as usize, part.bytes.len() - 8);

        let mut reader = hound::WavReader::new(Cursor::new(part.bytes)).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, -1, i16::MIN]);
    }

    #[test]
    fn test_oversized_pcm_is_rejected() {
        assert_eq!(data_chunk_size(1_000).unwrap(), 1_000);
        assert!(matches!(
            data_chunk_size(u32::MAX as usize - 35),
            Err(UploadError::TooLarge(_))
        ));
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            data_chunk_size(u32::MAX as usize + 1),
            Err(UploadError::TooLarge(_))
        ));
    }

    #[test]
    fn test_partial_frame_is_rejected() {
        let artifact = FinishedArtifact::new(vec![1, 0, 2], "audio/L16;rate=16000;channels=1", 0, 1);
        assert!(matches!(
            package_artifact(&artifact),
            Err(UploadError::PartialFrame(3))
        ));
    }

    #[test]
    fn test_encoded_audio_passes_through() {
        let artifact = FinishedArtifact::new(b"webm".to_vec(), "audio/webm;codecs=opus", 3, 2);
        let part = package_artifact(&artifact).unwrap();
        assert_eq!(part.file_name, "recording.webm");
        assert_eq!(part.mime_type, "audio/webm");
        assert_eq!(part.bytes, b"webm");
    }

    #[test]
    fn test_unusable_artifacts_are_rejected() {
        let empty = FinishedArtifact::new(Vec::new(), "audio/webm", 0, 0);
        assert!(matches!(package_artifact(&empty), Err(UploadError::EmptyRecording)));

        let no_rate = FinishedArtifact::new(vec![0, 0], "audio/L16", 0, 1);
        assert!(matches!(
            package_artifact(&no_rate),
            Err(UploadError::InvalidMediaType(_))
        ));
    }

    #[tokio::test]
    async fn test_create_reflection_posts_audio_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/reflections/"))
            .and(header("authorization", "Bearer secret"))
            .and(body_string_contains("name=\"audio_file\""))
            .and(body_string_contains("filename=\"recording.webm\""))
            .respond_with(ResponseTemplate::new(201).set_body_json(reflection_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReflectionClient::new(&api_config(&server, Some("secret"))).unwrap();
        let artifact = FinishedArtifact::new(b"voice".to_vec(), "audio/webm", 4, 1);
        let reflection = client.create_reflection(&artifact).await.unwrap();

        assert_eq!(reflection.id, 12);
        assert_eq!(reflection.transcription, None);
        assert!(reflection.keywords.is_empty());
    }

    #[tokio::test]
    async fn test_api_errors_keep_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/reflections/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid token"))
            .mount(&server)
            .await;

        let client = ReflectionClient::new(&api_config(&server, None))
            .unwrap()
            .with_token("expired");
        let artifact = FinishedArtifact::new(b"voice".to_vec(), "audio/webm", 4, 1);

        match client.create_reflection(&artifact).await {
            Err(UploadError::Api { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "Invalid token");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_normalizes_trailing_slash() {
        let config = ApiConfig {
            base_url: "http://localhost:8000/api/".to_string(),
            token: None,
            timeout_secs: 30,
        };
        let client = ReflectionClient::new(&config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8000/api/reflections/");
    }
}
