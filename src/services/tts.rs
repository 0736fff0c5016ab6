//! Speech synthesis.
//!
//! Text is sent to an HTTP speech endpoint and the returned audio is written
//! to the artifact store. Callers get back a reference to a complete file or
//! an error, never a partial result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::services::artifacts::{Artifact, ArtifactStore};

/// Voices the synthesis backend is known to accept, with display labels.
pub const VOICE_CATALOG: &[(&str, &str)] = &[
    ("zh-CN-XiaoxiaoNeural", "中文女声(晓晓)"),
    ("zh-CN-YunxiNeural", "中文男声(云希)"),
    ("zh-CN-YunyangNeural", "中文男声(云扬)"),
    ("zh-CN-XiaoyiNeural", "中文女声(晓伊)"),
    ("zh-CN-YunjianNeural", "中文男声(云健)"),
    ("zh-CN-XiaoshuangNeural", "中文女声(晓双)"),
    ("en-US-JennyNeural", "English Female (Jenny)"),
    ("en-US-GuyNeural", "English Male (Guy)"),
    ("en-US-AriaNeural", "English Female (Aria)"),
    ("en-US-DavisNeural", "English Male (Davis)"),
    ("ja-JP-NanamiNeural", "Japanese Female (Nanami)"),
    ("ko-KR-SunHiNeural", "Korean Female (SunHi)"),
    ("fr-FR-DeniseNeural", "French Female (Denise)"),
    ("de-DE-KatjaNeural", "German Female (Katja)"),
];

/// A voice id that is guaranteed to be in `VOICE_CATALOG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice(&'static str);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown voice id: {0}")]
pub struct UnknownVoice(pub String);

impl Voice {
    pub fn parse(id: &str) -> Result<Self, UnknownVoice> {
        VOICE_CATALOG
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(known, _)| Voice(known))
            .ok_or_else(|| UnknownVoice(id.to_string()))
    }

    pub fn id(&self) -> &'static str {
        self.0
    }
}

impl Default for Voice {
    fn default() -> Self {
        Voice(VOICE_CATALOG[0].0)
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech service unreachable: {0}")]
    Request(String),
    #[error("speech service returned status {0}")]
    Upstream(u16),
    #[error("speech service returned no audio")]
    EmptyAudio,
    #[error("failed to store audio: {0}")]
    Storage(#[from] std::io::Error),
}

impl SynthesisError {
    pub fn public_message(&self) -> &'static str {
        match self {
            SynthesisError::Request(_) | SynthesisError::Upstream(_) => {
                "Speech service is unavailable"
            }
            SynthesisError::EmptyAudio => "Speech service returned no audio",
            SynthesisError::Storage(_) => "Failed to store synthesized audio",
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Artifact, SynthesisError>;
}

pub struct HttpSpeechSynthesizer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    artifacts: Arc<ArtifactStore>,
}

impl HttpSpeechSynthesizer {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
        artifacts: Arc<ArtifactStore>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint,
            api_key,
            model,
            artifacts,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Artifact, SynthesisError> {
        let preview: String = text.chars().take(50).collect();
        info!("Generating TTS ({}) for: {}...", voice.id(), preview);

        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "input": text,
            "voice": voice.id(),
            "response_format": "mp3",
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SynthesisError::Request(e.without_url().to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            warn!("TTS service returned status {}", status);
            return Err(SynthesisError::Upstream(status));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Request(e.without_url().to_string()))?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        let artifact = self.artifacts.save(&audio, "mp3").await?;
        info!("Generated audio file: {}", artifact.reference);
        Ok(artifact)
    }
}
