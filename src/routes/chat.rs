//! Chat routes: model completion with optional spoken reply, text
//! regeneration, and the voice catalog.

use std::collections::BTreeMap;

use axum::{
    Extension, Json, Router, extract::State, middleware, routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::middleware::AuthMiddleware;
use crate::auth::models::AuthUser;
use crate::database::models::{ChatMessage, Role};
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::server::AppState;
use crate::services::chat_client;
use crate::services::tts::{VOICE_CATALOG, Voice};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub voice_response: bool,
    pub voice: Option<String>,
    pub conversation_id: Option<Uuid>,
}

/// The upstream completion body, passed through, plus the audio annotations.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    pub completion: Map<String, Value>,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub text: Option<String>,
    #[serde(rename = "currentContent", default)]
    pub current_content: String,
}

#[derive(Debug, Serialize)]
pub struct RegenerateResponse {
    pub regenerated_text: String,
}

#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub voices: BTreeMap<&'static str, &'static str>,
}

/// POST /api/chat
///
/// A chat failure fails the request. A synthesis failure only clears
/// `has_audio` and sets `tts_error`; the reply is still returned.
pub async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    AppJson(request): AppJson<ChatRequest>,
) -> AppResult<Json<ChatResponse>> {
    if request.messages.is_empty() {
        return Err(AppError::validation("messages must not be empty"));
    }
    let voice = match request.voice.as_deref() {
        Some(id) => Voice::parse(id).map_err(|e| AppError::validation(e.to_string()))?,
        None => state.default_voice,
    };
    if let Some(conversation_id) = request.conversation_id {
        if state
            .store
            .get_conversation(user.id, conversation_id)
            .await?
            .is_none()
        {
            return Err(AppError::not_found("Conversation not found"));
        }
    }

    let last_user_message = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .cloned();

    let completion = state.chat.complete(request.messages).await?;

    if let Some(conversation_id) = request.conversation_id {
        let mut turn: Vec<ChatMessage> = last_user_message.into_iter().collect();
        turn.push(ChatMessage::new(Role::Assistant, completion.reply.clone()));
        if state
            .store
            .append_messages(user.id, conversation_id, turn)
            .await?
            .is_none()
        {
            return Err(AppError::not_found("Conversation not found"));
        }
    }

    let mut response = ChatResponse {
        completion: completion.body,
        has_audio: false,
        audio_path: None,
        audio_url: None,
        tts_error: None,
    };

    if request.voice_response {
        match state.tts.synthesize(&completion.reply, voice).await {
            Ok(artifact) => {
                response.audio_url = Some(format!("/api/audio/{}", artifact.reference));
                response.audio_path = Some(artifact.reference);
                response.has_audio = true;
            }
            Err(e) => {
                tracing::warn!("TTS failed, returning text-only reply: {}", e);
                response.tts_error = Some(e.public_message().to_string());
            }
        }
    }

    Ok(Json(response))
}

/// POST /api/regenerate-text
pub async fn regenerate(
    State(state): State<AppState>,
    AppJson(request): AppJson<RegenerateRequest>,
) -> AppResult<Json<RegenerateResponse>> {
    let text = request
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::validation("No text provided"))?;

    let regenerated_text =
        chat_client::regenerate_text(state.chat.as_ref(), &request.current_content, &text).await?;
    Ok(Json(RegenerateResponse { regenerated_text }))
}

/// GET /api/tts/voices
pub async fn voices() -> Json<VoicesResponse> {
    Json(VoicesResponse {
        voices: VOICE_CATALOG.iter().copied().collect(),
    })
}

pub fn create_chat_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/regenerate-text", post(regenerate))
        .route("/api/tts/voices", get(voices))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            AuthMiddleware::require_access,
        ))
}
