//! Auth routes: email verification codes, registration, login, token refresh,
//! and password management.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
};

use crate::auth::jwt::{AuthError, TokenKind};
use crate::auth::middleware::{AuthMiddleware, bearer_token};
use crate::auth::models::{
    AuthUser, CaptchaQuery, CaptchaResponse, ChangePasswordRequest, LoginRequest, LoginResponse,
    MessageResponse, RefreshResponse, RegisterRequest, RegisterResponse, ResetPasswordRequest,
};
use crate::auth::password::{hash_password_async, verify_password_async};
use crate::database::models::{NewUser, UserProfile};
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppQuery};
use crate::server::AppState;

const MIN_PASSWORD_LEN: usize = 6;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 50;
const MAX_EMAIL_LEN: usize = 100;

fn required(value: Option<String>, field: &str) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::validation(format!("Missing required field: {}", field)))
}

/// Passwords are taken verbatim, without trimming.
fn required_password(value: Option<String>, field: &str) -> AppResult<String> {
    let password = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::validation(format!("Missing required field: {}", field)))?;
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(AppError::validation(format!(
            "Password must be between {} and {} characters",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        )));
    }
    Ok(password)
}

fn normalize_email(raw: String) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    if !email.contains('@') || email.chars().count() > MAX_EMAIL_LEN {
        return Err(AppError::validation("Invalid email address"));
    }
    Ok(email)
}

fn issue_pair(state: &AppState, user_id: uuid::Uuid) -> AppResult<(String, String)> {
    let access = state.jwt_service.issue(user_id, TokenKind::Access)?;
    let refresh = state.jwt_service.issue(user_id, TokenKind::Refresh)?;
    Ok((access, refresh))
}

/// GET /api/auth/captcha/email?email=
pub async fn captcha_email(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<CaptchaQuery>,
) -> AppResult<Json<CaptchaResponse>> {
    let email = normalize_email(required(query.email, "email")?)?;

    let code = state.codes.issue(&email);
    state.mailer.send_code(&email, &code).await?;
    tracing::info!("Verification code issued for {}", email);

    Ok(Json(CaptchaResponse {
        code: 200,
        message: "Verification code sent successfully to your email".into(),
    }))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let name = required(payload.username, "username")?;
    let email = normalize_email(required(payload.email, "email")?)?;
    let password = required_password(payload.password, "password")?;
    let captcha = required(payload.captcha, "captcha")?;
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::validation(format!(
            "Username must be between 1 and {} characters",
            MAX_NAME_LEN
        )));
    }

    state.codes.redeem(&email, &captcha)?;

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("User already exists".into()));
    }

    let password_hash = hash_password_async(password).await?;
    let user = state
        .store
        .create_user(NewUser {
            name,
            email,
            password_hash,
        })
        .await?;
    tracing::info!("Registered user {}", user.id);

    let (access_token, refresh_token) = issue_pair(&state, user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            access_token,
            refresh_token,
            expires_in: state.jwt_service.ttl(TokenKind::Access).num_seconds(),
            user: UserProfile::from(&user),
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let email = required(payload.email, "email")?.to_lowercase();
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::validation("Missing required field: password"))?;

    let Some(user) = state.store.find_user_by_email(&email).await? else {
        return Err(AppError::InvalidCredentials);
    };
    if !verify_password_async(password, user.password_hash.clone()).await? {
        tracing::warn!("Failed login for user {}", user.id);
        return Err(AppError::InvalidCredentials);
    }

    let (token, refresh_token) = issue_pair(&state, user.id)?;
    Ok(Json(LoginResponse {
        success: true,
        token,
        refresh_token,
        expires_in: state.jwt_service.ttl(TokenKind::Access).num_seconds(),
        user: UserProfile::from(&user),
    }))
}

/// POST /api/auth/refresh. Requires a refresh token; access tokens are refused.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<RefreshResponse>> {
    let token = bearer_token(&headers).ok_or(AuthError::MissingCredential)?;
    let claims = state.jwt_service.validate(token, TokenKind::Refresh)?;

    let user = state
        .store
        .find_user_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(RefreshResponse {
        access_token: state.jwt_service.issue(user.id, TokenKind::Access)?,
        expires_in: state.jwt_service.ttl(TokenKind::Access).num_seconds(),
        user: UserProfile::from(&user),
    }))
}

/// GET /api/auth/user
pub async fn current_user(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<UserProfile>> {
    let user = state
        .store
        .find_user_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(Json(UserProfile::from(&user)))
}

/// POST /api/auth/logout. Tokens are stateless; the client discards them.
pub async fn logout(Extension(auth_user): Extension<AuthUser>) -> Json<MessageResponse> {
    tracing::info!("User {} logged out", auth_user.id);
    Json(MessageResponse::ok("Successfully logged out"))
}

/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let current = payload
        .current_password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::validation("Missing required field: current_password"))?;
    let new_password = required_password(payload.new_password, "new_password")?;

    let user = state
        .store
        .find_user_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    if !verify_password_async(current, user.password_hash.clone()).await? {
        return Err(AppError::validation("Current password is incorrect"));
    }

    let password_hash = hash_password_async(new_password).await?;
    state.store.update_password(user.id, &password_hash).await?;
    Ok(Json(MessageResponse::ok("Password changed successfully")))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let email = normalize_email(required(payload.email, "email")?)?;
    let captcha = required(payload.captcha, "captcha")?;
    let new_password = required_password(payload.new_password, "new_password")?;

    state.codes.redeem(&email, &captcha)?;

    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    let password_hash = hash_password_async(new_password).await?;
    state.store.update_password(user.id, &password_hash).await?;
    tracing::info!("Password reset for user {}", user.id);
    Ok(Json(MessageResponse::ok("Password reset successfully")))
}

pub fn create_auth_routes(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/auth/user", get(current_user))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/change-password", post(change_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            AuthMiddleware::require_access,
        ));

    Router::new()
        .route("/api/auth/captcha/email", get(captcha_email))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/reset-password", post(reset_password))
        .merge(protected)
}
