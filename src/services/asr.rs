//! Speech recognition: file transcription through an HTTP backend plus the
//! helpers shared with live capture.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, multipart};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no capture device configured")]
    NotConfigured,
    #[error("failed to open capture device: {0}")]
    Open(String),
    #[error("capture device read failed: {0}")]
    Read(String),
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("audio device error: {0}")]
    Device(#[from] DeviceError),
    #[error("speech recognition failed: {0}")]
    Processing(String),
    #[error("Recording already in progress")]
    AlreadyRecording,
    #[error("No recording in progress")]
    NotRecording,
    #[error("No audio recorded")]
    NoAudio,
}

impl RecognitionError {
    pub fn code(&self) -> &'static str {
        match self {
            RecognitionError::Device(_) => "audio_device_error",
            RecognitionError::Processing(_) => "recognition_failed",
            RecognitionError::AlreadyRecording => "already_recording",
            RecognitionError::NotRecording => "not_recording",
            RecognitionError::NoAudio => "no_audio",
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            RecognitionError::Device(DeviceError::NotConfigured) => {
                "No audio capture device is configured".to_string()
            }
            RecognitionError::Device(_) => "Audio capture device is unavailable".to_string(),
            RecognitionError::Processing(_) => "Speech recognition failed".to_string(),
            _ => self.to_string(),
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a complete audio file. An empty transcript is a valid result.
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, RecognitionError>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct HttpTranscriber {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTranscriber {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, RecognitionError> {
        info!("Transcribing {} bytes of audio", audio.len());

        let file = multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| RecognitionError::Processing(e.to_string()))?;
        let form = multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone());

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RecognitionError::Processing(e.without_url().to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            warn!("ASR service returned status {}", status);
            return Err(RecognitionError::Processing(format!(
                "recognition service returned status {}",
                status
            )));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::Processing(e.without_url().to_string()))?;
        let text = normalize_transcript(&body.text);
        info!("Recognition result: {}", text);
        Ok(text)
    }
}

/// Strip `<|...|>` annotation markers (language, emotion, event tags) and
/// collapse whitespace.
pub fn normalize_transcript(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("<|") {
        cleaned.push_str(&rest[..start]);
        match rest[start + 2..].find("|>") {
            Some(end) => {
                cleaned.push(' ');
                rest = &rest[start + 2 + end + 2..];
            }
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    cleaned.push_str(rest);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pack mono float samples into a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;

    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = (samples.len() * usize::from(block_align)) as u32;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    for sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        wav.extend_from_slice(&scaled.to_le_bytes());
    }
    wav
}
