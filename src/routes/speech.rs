//! Speech routes: file transcription, the live recording session, and
//! playback of synthesized audio.

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::header,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use crate::auth::middleware::AuthMiddleware;
use crate::error::{AppError, AppResult};
use crate::extract::AppPath;
use crate::server::AppState;
use crate::services::artifacts::content_type_for;
use crate::services::asr::{RecognitionError, encode_wav};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct RecordingStarted {
    pub message: &'static str,
}

/// POST /api/transcribe (multipart, field `audio`)
pub async fn transcribe(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<TranscriptResponse>> {
    let mut multipart = multipart?;

    let mut audio = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("audio") {
            audio = Some(field.bytes().await?);
            break;
        }
    }
    let audio = audio
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::validation("No audio file provided"))?;

    let text = state.asr.transcribe(audio.to_vec()).await?;
    Ok(Json(TranscriptResponse { text }))
}

/// POST /api/asr/start
pub async fn start_recording(State(state): State<AppState>) -> AppResult<Json<RecordingStarted>> {
    let recorder = state.recorder.clone();
    tokio::task::spawn_blocking(move || recorder.start())
        .await
        .context("Recording start task failed")??;

    Ok(Json(RecordingStarted {
        message: "Recording started",
    }))
}

/// POST /api/asr/stop
pub async fn stop_recording(State(state): State<AppState>) -> AppResult<Json<TranscriptResponse>> {
    let recorder = state.recorder.clone();
    let recording = tokio::task::spawn_blocking(move || recorder.stop())
        .await
        .context("Recording stop task failed")??;

    if recording.samples.is_empty() {
        return Err(RecognitionError::NoAudio.into());
    }

    let wav = encode_wav(&recording.samples, recording.sample_rate);
    let text = state.asr.transcribe(wav).await?;
    Ok(Json(TranscriptResponse { text }))
}

/// GET /api/audio/{reference}
pub async fn get_audio(
    State(state): State<AppState>,
    AppPath(reference): AppPath<String>,
) -> AppResult<Response> {
    let artifact = state
        .artifacts
        .resolve(&reference)
        .await
        .ok_or_else(|| AppError::not_found("File not found"))?;
    let content_type = artifact
        .reference
        .rsplit_once('.')
        .and_then(|(_, ext)| content_type_for(ext))
        .unwrap_or("application/octet-stream");

    let bytes = tokio::fs::read(&artifact.path)
        .await
        .with_context(|| format!("Failed to read audio file {}", artifact.reference))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", artifact.reference),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub fn create_speech_routes(state: &AppState) -> Router<AppState> {
    let header_auth = Router::new()
        .route(
            "/api/transcribe",
            post(transcribe).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/asr/start", post(start_recording))
        .route("/api/asr/stop", post(stop_recording))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            AuthMiddleware::require_access,
        ));

    let audio = Router::new()
        .route("/api/audio/{reference}", get(get_audio))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            AuthMiddleware::require_access_or_query,
        ));

    header_auth.merge(audio)
}

#[cfg(test)]
mod tests {
    use crate::auth::jwt::TokenKind;
    use crate::test_support::{TestApp, json_request, multipart_request};
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_transcribe_upload() {
        let app = TestApp::new().await;
        let token = app.login_as("alice").await;

        let (status, body) = app
            .send(multipart_request("/api/transcribe", &token, "audio", b"RIFFfake"))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["text"], "transcribed 8 bytes");

        let (status, body) = app
            .send(multipart_request("/api/transcribe", &token, "other", b"RIFFfake"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No audio file provided");
    }

    #[tokio::test]
    async fn test_recording_session_lifecycle() {
        let app = TestApp::new().await;
        let token = app.login_as("alice").await;

        let (status, body) = app
            .send(json_request(Method::POST, "/api/asr/stop", Some(&token), json!(null)))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "not_recording");

        let (status, _) = app
            .send(json_request(Method::POST, "/api/asr/start", Some(&token), json!(null)))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .send(json_request(Method::POST, "/api/asr/start", Some(&token), json!(null)))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "already_recording");
        assert!(app.state.recorder.is_recording());

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let (status, body) = app
            .send(json_request(Method::POST, "/api/asr/stop", Some(&token), json!(null)))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert!(body["text"].as_str().unwrap().starts_with("transcribed"));
        assert!(!app.state.recorder.is_recording());
    }

    #[tokio::test]
    async fn test_audio_accepts_header_or_query_token() {
        let app = TestApp::new().await;
        let token = app.login_as("alice").await;
        let artifact = app.state.artifacts.save(b"ID3audio", "mp3").await.unwrap();
        let path = format!("/api/audio/{}", artifact.reference);

        let (status, headers, bytes) = app
            .send_raw(json_request(Method::GET, &path, Some(&token), json!(null)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "audio/mpeg");
        assert_eq!(&bytes[..], b"ID3audio");

        let (status, _, bytes) = app
            .send_raw(json_request(
                Method::GET,
                &format!("{}?token={}", path, token),
                None,
                json!(null),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&bytes[..], b"ID3audio");

        let (status, body) = app
            .send(json_request(Method::GET, &format!("{}?token=garbage", path), None, json!(null)))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_invalid");

        let (status, body) = app.send(json_request(Method::GET, &path, None, json!(null))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_missing");
    }

    #[tokio::test]
    async fn test_query_token_is_validated_like_header_token() {
        let app = TestApp::new().await;
        let token = app.login_as("alice").await;
        let user = app.state.jwt_service.validate(&token, TokenKind::Access).unwrap().sub;
        let artifact = app.state.artifacts.save(b"ID3audio", "mp3").await.unwrap();
        let path = format!("/api/audio/{}", artifact.reference);

        let jwt = &app.state.jwt_service;
        let cases = [
            (jwt.issue(user, TokenKind::Refresh).unwrap(), "token_wrong_type"),
            (
                jwt.issue_with_ttl(user, TokenKind::Access, chrono::Duration::seconds(-60))
                    .unwrap(),
                "token_expired",
            ),
            (jwt.issue(Uuid::new_v4(), TokenKind::Access).unwrap(), "token_invalid"),
        ];

        for (bad, code) in cases {
            let (status, by_header) = app
                .send(json_request(Method::GET, &path, Some(&bad), json!(null)))
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(by_header["code"], code);

            let (status, by_query) = app
                .send(json_request(Method::GET, &format!("{}?token={}", path, bad), None, json!(null)))
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(by_query, by_header);
        }
    }

    #[tokio::test]
    async fn test_audio_rejects_unknown_references() {
        let app = TestApp::new().await;
        let token = app.login_as("alice").await;

        for path in [
            "/api/audio/secret.mp3",
            "/api/audio/..%2F..%2Fetc%2Fpasswd",
            "/api/audio/0b0f2d9c-6f5e-4c55-9a53-8f1b2f0b1c7e.mp3",
        ] {
            let (status, _) = app
                .send(json_request(Method::GET, path, Some(&token), json!(null)))
                .await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", path);
        }
    }
}
