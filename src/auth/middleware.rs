//! Authentication Middleware
//!
//! Axum middleware for access-token validation. A request passes only if the
//! token verifies, is an access token, and names a user that still exists.

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt::{AuthError, TokenKind};
use crate::auth::models::AuthUser;
use crate::error::AppError;
use crate::server::AppState;

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extract the token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub struct AuthMiddleware;

impl AuthMiddleware {
    /// Require an access token in the `Authorization` header.
    pub async fn require_access(
        State(state): State<AppState>,
        mut req: Request,
        next: Next,
    ) -> Result<Response, AppError> {
        let token = bearer_token(req.headers())
            .map(str::to_owned)
            .ok_or(AuthError::MissingCredential)?;

        let user = authenticate(&state, &token).await?;
        req.extensions_mut().insert(user);
        Ok(next.run(req).await)
    }

    /// Like `require_access`, but falls back to a `token` query parameter for
    /// clients such as audio elements that cannot set headers.
    pub async fn require_access_or_query(
        State(state): State<AppState>,
        mut req: Request,
        next: Next,
    ) -> Result<Response, AppError> {
        let token = match bearer_token(req.headers()) {
            Some(token) => Some(token.to_owned()),
            None => Query::<TokenQuery>::try_from_uri(req.uri())
                .ok()
                .and_then(|Query(q)| q.token)
                .filter(|token| !token.is_empty()),
        }
        .ok_or(AuthError::MissingCredential)?;

        let user = authenticate(&state, &token).await?;
        req.extensions_mut().insert(user);
        Ok(next.run(req).await)
    }
}

async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let claims = state
        .jwt_service
        .validate(token, TokenKind::Access)
        .inspect_err(|e| tracing::warn!("[AuthMiddleware] token rejected: {:?}", e))?;

    match state.store.find_user_by_id(claims.sub).await? {
        Some(user) => Ok(AuthUser::from(&user)),
        None => {
            tracing::warn!("[AuthMiddleware] token subject {} no longer exists", claims.sub);
            Err(AuthError::InvalidSignature.into())
        }
    }
}
