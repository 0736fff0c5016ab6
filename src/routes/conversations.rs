//! Conversation CRUD. Every query is scoped to the caller, so another user's
//! conversation is indistinguishable from a missing one.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    routing::get,
};
use uuid::Uuid;

use crate::auth::middleware::AuthMiddleware;
use crate::auth::models::{AuthUser, MessageResponse};
use crate::database::models::{Conversation, ConversationUpdate, NewConversation};
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath};
use crate::server::AppState;

const MAX_TITLE_LEN: usize = 200;
const MAX_DATE_LEN: usize = 50;

fn conversation_not_found() -> AppError {
    AppError::not_found("Conversation not found")
}

/// Shared with community posts, which use the same title column width.
pub(crate) fn check_title(title: &str) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::validation("Title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::validation(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

fn check_date(date: &str) -> AppResult<()> {
    if date.chars().count() > MAX_DATE_LEN {
        return Err(AppError::validation(format!(
            "Date must be at most {} characters",
            MAX_DATE_LEN
        )));
    }
    Ok(())
}

/// POST /api/conversations
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    AppJson(payload): AppJson<NewConversation>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    check_title(&payload.title)?;
    check_date(&payload.date)?;
    let conversation = state.store.create_conversation(user.id, payload).await?;
    tracing::info!("User {} created conversation {}", user.id, conversation.id);
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /api/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<Json<Vec<Conversation>>> {
    Ok(Json(state.store.list_conversations(user.id).await?))
}

/// GET /api/conversations/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Conversation>> {
    state
        .store
        .get_conversation(user.id, id)
        .await?
        .map(Json)
        .ok_or_else(conversation_not_found)
}

/// PUT /api/conversations/{id}
pub async fn update_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    AppPath(id): AppPath<Uuid>,
    AppJson(update): AppJson<ConversationUpdate>,
) -> AppResult<Json<Conversation>> {
    if let Some(title) = &update.title {
        check_title(title)?;
    }
    if let Some(date) = &update.date {
        check_date(date)?;
    }
    state
        .store
        .update_conversation(user.id, id, update)
        .await?
        .map(Json)
        .ok_or_else(conversation_not_found)
}

/// DELETE /api/conversations/{id}. Messages go with it.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    if !state.store.delete_conversation(user.id, id).await? {
        return Err(conversation_not_found());
    }
    Ok(Json(MessageResponse::ok("Conversation deleted successfully")))
}

pub fn create_conversation_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation)
                .put(update_conversation)
                .delete(delete_conversation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            AuthMiddleware::require_access,
        ))
}
