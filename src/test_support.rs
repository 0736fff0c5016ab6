//! Router-level test harness: an `AppState` wired to the in-memory store and
//! fake chat, speech, and capture backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::auth::jwt::{JwtService, TokenKind};
use crate::auth::verification::VerificationCodeCache;
use crate::database::models::{ChatMessage, NewUser};
use crate::database::{MemoryStore, Store};
use crate::server::{AppState, build_router};
use crate::services::artifacts::{Artifact, ArtifactStore};
use crate::services::asr::{DeviceError, RecognitionError, Transcriber};
use crate::services::chat_client::{ChatBackend, ChatError, Completion};
use crate::services::mailer::LogMailer;
use crate::services::recorder::{AudioSource, CaptureStream, Recorder};
use crate::services::tts::{SpeechSynthesizer, SynthesisError, Voice};

pub const FAKE_REPLY: &str = "Tell me more about the lake.";

#[derive(Default)]
pub struct FakeChat {
    failure: Mutex<Option<ChatError>>,
    calls: AtomicUsize,
}

impl FakeChat {
    pub fn fail_with(&self, err: ChatError) {
        *self.failure.lock() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for FakeChat {
    async fn complete(&self, _messages: Vec<ChatMessage>) -> Result<Completion, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        Completion::from_body(json!({
            "id": "fake-completion",
            "model": "fake",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": FAKE_REPLY } }]
        }))
    }
}

pub struct FakeTts {
    artifacts: Arc<ArtifactStore>,
    fail_next: AtomicBool,
    voices: Mutex<Vec<&'static str>>,
}

impl FakeTts {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn voices_used(&self) -> Vec<&'static str> {
        self.voices.lock().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeTts {
    async fn synthesize(&self, _text: &str, voice: Voice) -> Result<Artifact, SynthesisError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SynthesisError::Upstream(503));
        }
        self.voices.lock().push(voice.id());
        Ok(self.artifacts.save(b"ID3fake", "mp3").await?)
    }
}

pub struct FakeTranscriber;

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, RecognitionError> {
        Ok(format!("transcribed {} bytes", audio.len()))
    }
}

pub struct SilenceSource;

struct SilenceStream;

impl CaptureStream for SilenceStream {
    fn read_chunk(&mut self) -> Result<Vec<f32>, DeviceError> {
        std::thread::sleep(Duration::from_millis(2));
        Ok(vec![0.0; 32])
    }
}

impl AudioSource for SilenceSource {
    fn open(&self) -> Result<Box<dyn CaptureStream>, DeviceError> {
        Ok(Box::new(SilenceStream))
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }
}

pub struct TestApp {
    pub state: AppState,
    pub memory: Arc<MemoryStore>,
    pub chat: Arc<FakeChat>,
    pub tts: Arc<FakeTts>,
    router: Router,
    _audio_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let audio_dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::open(audio_dir.path()).await.unwrap());
        let memory = Arc::new(MemoryStore::new());
        let chat = Arc::new(FakeChat::default());
        let tts = Arc::new(FakeTts {
            artifacts: Arc::clone(&artifacts),
            fail_next: AtomicBool::new(false),
            voices: Mutex::new(Vec::new()),
        });

        let state = AppState {
            jwt_service: Arc::new(JwtService::new(
                "test-secret",
                chrono::Duration::hours(1),
                chrono::Duration::days(30),
            )),
            store: memory.clone(),
            codes: Arc::new(VerificationCodeCache::new(Duration::from_secs(300))),
            mailer: Arc::new(LogMailer),
            chat: chat.clone(),
            tts: tts.clone(),
            asr: Arc::new(FakeTranscriber),
            recorder: Arc::new(Recorder::new(Arc::new(SilenceSource))),
            artifacts,
            default_voice: Voice::default(),
        };
        let router = build_router(state.clone(), &["http://localhost:3000".to_string()]);

        Self {
            state,
            memory,
            chat,
            tts,
            router,
            _audio_dir: audio_dir,
        }
    }

    /// Create a user directly in the store and return an access token for it.
    pub async fn login_as(&self, name: &str) -> String {
        let user = self
            .memory
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{}@example.com", name),
                password_hash: "not-a-real-hash".to_string(),
            })
            .await
            .unwrap();
        self.state.jwt_service.issue(user.id, TokenKind::Access).unwrap()
    }

    /// Create an empty conversation through the API and return its id.
    pub async fn create_conversation(&self, token: &str) -> String {
        let (status, body) = self
            .send(json_request(
                Method::POST,
                "/api/conversations",
                Some(token),
                json!({ "title": "Summer", "content": "", "date": "2024-07-01" }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, _, bytes) = self.send_raw(request).await;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if body.is_null() {
        builder.body(Body::empty()).unwrap()
    } else {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

pub fn multipart_request(uri: &str, token: &str, field: &str, bytes: &[u8]) -> Request<Body> {
    const BOUNDARY: &str = "ora-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}
