//! Community feed routes.

use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    routing::{delete, get},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::AuthMiddleware;
use crate::auth::models::AuthUser;
use crate::database::models::{CommunityPost, NewPost, SourceType};
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath};
use crate::routes::conversations::check_title;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub is_public: Option<bool>,
    pub source_type: Option<SourceType>,
    pub source_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PostsResponse {
    pub success: bool,
    pub posts: Vec<CommunityPost>,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub success: bool,
    pub post: CommunityPost,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
}

/// GET /api/community/posts
pub async fn list_public_posts(State(state): State<AppState>) -> AppResult<Json<PostsResponse>> {
    Ok(Json(PostsResponse {
        success: true,
        posts: state.store.list_public_posts().await?,
    }))
}

/// GET /api/community/my-posts
pub async fn list_my_posts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<Json<PostsResponse>> {
    Ok(Json(PostsResponse {
        success: true,
        posts: state.store.list_posts_by_author(user.id).await?,
    }))
}

/// POST /api/community/posts
pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    AppJson(request): AppJson<CreatePostRequest>,
) -> AppResult<Json<PostResponse>> {
    let (Some(title), Some(content)) = (
        request.title.filter(|t| !t.trim().is_empty()),
        request.content.filter(|c| !c.trim().is_empty()),
    ) else {
        return Err(AppError::validation("Title and content are required"));
    };
    check_title(&title)?;

    if let Some(source_id) = request.source_id {
        if state.store.get_conversation(user.id, source_id).await?.is_none() {
            return Err(AppError::not_found("Source conversation not found"));
        }
    }

    let post = state
        .store
        .create_post(
            user.id,
            NewPost {
                title,
                content,
                is_public: request.is_public.unwrap_or(true),
                source_type: request.source_type.unwrap_or_default(),
                source_id: request.source_id,
            },
        )
        .await?;
    tracing::info!("User {} published post {}", user.id, post.id);

    Ok(Json(PostResponse {
        success: true,
        post,
    }))
}

/// DELETE /api/community/posts/{id}. Author only.
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<DeletedResponse>> {
    if !state.store.delete_post(user.id, id).await? {
        return Err(AppError::not_found("Post not found or unauthorized"));
    }
    Ok(Json(DeletedResponse { success: true }))
}

pub fn create_community_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/community/posts",
            get(list_public_posts).post(create_post),
        )
        .route("/api/community/my-posts", get(list_my_posts))
        .route("/api/community/posts/{id}", delete(delete_post))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            AuthMiddleware::require_access,
        ))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{TestApp, json_request};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_feed_visibility_and_authorship() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;
        let bob = app.login_as("bob").await;
        let conversation = app.create_conversation(&alice).await;

        let (status, public) = app
            .send(json_request(
                Method::POST,
                "/api/community/posts",
                Some(&alice),
                json!({
                    "title": "The lake",
                    "content": "We swam every morning",
                    "sourceType": "diary",
                    "sourceId": conversation,
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", public);
        assert_eq!(public["post"]["author_name"], "alice");
        assert_eq!(public["post"]["is_public"], true);
        assert_eq!(public["post"]["source_type"], "diary");

        let (status, _) = app
            .send(json_request(
                Method::POST,
                "/api/community/posts",
                Some(&alice),
                json!({ "title": "Draft", "content": "Not yet", "isPublic": false }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, feed) = app
            .send(json_request(Method::GET, "/api/community/posts", Some(&bob), json!(null)))
            .await;
        assert_eq!(feed["posts"].as_array().unwrap().len(), 1);

        let (_, mine) = app
            .send(json_request(Method::GET, "/api/community/my-posts", Some(&alice), json!(null)))
            .await;
        assert_eq!(mine["posts"].as_array().unwrap().len(), 2);

        let path = format!("/api/community/posts/{}", public["post"]["id"].as_str().unwrap());
        let (status, _) = app
            .send(json_request(Method::DELETE, &path, Some(&bob), json!(null)))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .send(json_request(Method::DELETE, &path, Some(&alice), json!(null)))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_requires_fields_and_own_source() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;
        let bob = app.login_as("bob").await;
        let conversation = app.create_conversation(&alice).await;

        let (status, _) = app
            .send(json_request(
                Method::POST,
                "/api/community/posts",
                Some(&bob),
                json!({ "title": "", "content": "x" }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .send(json_request(
                Method::POST,
                "/api/community/posts",
                Some(&bob),
                json!({ "title": "t".repeat(201), "content": "x" }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");

        let (status, _) = app
            .send(json_request(
                Method::POST,
                "/api/community/posts",
                Some(&bob),
                json!({ "title": "Stolen", "content": "x", "sourceId": conversation }),
            ))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
