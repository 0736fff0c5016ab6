//! Configuration module for environment variables and application settings

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::services::tts::Voice;

const DEV_JWT_SECRET: &str = "ora-dev-secret-change-me";
const DEFAULT_CHAT_API_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration; `None` runs against the in-memory store
    pub database: Option<DatabaseSettings>,

    /// Token and verification-code lifetimes
    pub auth: AuthConfig,

    /// Chat completion backend
    pub chat: ChatConfig,

    /// Speech synthesis backend
    pub tts: TtsConfig,

    /// Speech recognition backend and live capture
    pub asr: AsrConfig,

    /// Synthesized audio storage
    pub audio: AudioConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub use_tls: bool,
    pub max_connections: usize,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub code_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub default_voice: Voice,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub capture_command: Option<Vec<String>>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub dir: PathBuf,
    pub retention: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_SECRET not set, using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let default_voice_id = text("TTS_DEFAULT_VOICE", "zh-CN-XiaoxiaoNeural");
        let default_voice = Voice::parse(&default_voice_id)
            .with_context(|| "TTS_DEFAULT_VOICE must name a voice from the catalog")?;

        Ok(Self {
            server: ServerConfig {
                host: text("SERVER_HOST", "0.0.0.0"),
                port: match get("PORT") {
                    Some(port) => parse_value("PORT", &port)?,
                    None => parse_or("SERVER_PORT", get("SERVER_PORT"), 3002)?,
                },
                cors_origins: text("CORS_ORIGINS", "http://localhost:3000")
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
            },

            database: match get("DATABASE_URL") {
                Some(url) => Some(DatabaseSettings {
                    url,
                    use_tls: parse_or("DATABASE_TLS", get("DATABASE_TLS"), false)?,
                    max_connections: parse_or(
                        "DATABASE_MAX_CONNECTIONS",
                        get("DATABASE_MAX_CONNECTIONS"),
                        16,
                    )?,
                }),
                None => None,
            },

            auth: AuthConfig {
                jwt_secret,
                access_ttl_secs: parse_or("JWT_ACCESS_TTL_SECS", get("JWT_ACCESS_TTL_SECS"), 3600)?,
                refresh_ttl_secs: parse_or(
                    "JWT_REFRESH_TTL_SECS",
                    get("JWT_REFRESH_TTL_SECS"),
                    30 * 24 * 3600,
                )?,
                code_ttl_secs: parse_or(
                    "VERIFICATION_CODE_TTL_SECS",
                    get("VERIFICATION_CODE_TTL_SECS"),
                    300,
                )?,
            },

            chat: ChatConfig {
                api_key: get("CHAT_API_KEY")
                    .ok_or_else(|| anyhow!("CHAT_API_KEY environment variable is required"))?,
                api_url: text("CHAT_API_URL", DEFAULT_CHAT_API_URL),
                model: text("CHAT_MODEL", "glm-4-plus"),
                timeout: Duration::from_secs(parse_or(
                    "CHAT_TIMEOUT_SECS",
                    get("CHAT_TIMEOUT_SECS"),
                    30,
                )?),
            },

            tts: TtsConfig {
                api_url: text("TTS_API_URL", "http://127.0.0.1:5050/v1/audio/speech"),
                api_key: get("TTS_API_KEY"),
                model: text("TTS_MODEL", "tts-1"),
                default_voice,
                timeout: Duration::from_secs(parse_or(
                    "TTS_TIMEOUT_SECS",
                    get("TTS_TIMEOUT_SECS"),
                    60,
                )?),
            },

            asr: AsrConfig {
                api_url: text("ASR_API_URL", "http://127.0.0.1:5051/v1/audio/transcriptions"),
                api_key: get("ASR_API_KEY"),
                model: text("ASR_MODEL", "sensevoice-small"),
                timeout: Duration::from_secs(parse_or(
                    "ASR_TIMEOUT_SECS",
                    get("ASR_TIMEOUT_SECS"),
                    60,
                )?),
                capture_command: get("ASR_CAPTURE_COMMAND")
                    .map(|cmd| cmd.split_whitespace().map(str::to_string).collect()),
                sample_rate: parse_or("ASR_SAMPLE_RATE", get("ASR_SAMPLE_RATE"), 16_000)?,
            },

            audio: AudioConfig {
                dir: PathBuf::from(text("AUDIO_DIR", "./data/audio")),
                retention: match get("AUDIO_RETENTION_SECS") {
                    Some(secs) => Some(Duration::from_secs(parse_value(
                        "AUDIO_RETENTION_SECS",
                        &secs,
                    )?)),
                    None => None,
                },
            },
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| anyhow!("{} has an invalid value {:?}: {}", key, raw, e))
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}
