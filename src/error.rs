//! # Error Module
//!
//! The single error type returned by route handlers. Every variant renders as
//! `{"status": <http status>, "code": "<machine code>", "message": "<text>"}`.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::jwt::AuthError;
use crate::auth::verification::VerificationError;
use crate::database::StoreError;
use crate::services::asr::RecognitionError;
use crate::services::chat_client::ChatError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Invalid or expired verification code")]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Auth(e) => (StatusCode::UNAUTHORIZED, e.code()),
            AppError::Verification(_) => (StatusCode::BAD_REQUEST, "verification_failed"),
            AppError::Chat(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.code()),
            AppError::Recognition(e) => {
                let status = match e {
                    RecognitionError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
                    RecognitionError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    RecognitionError::AlreadyRecording
                    | RecognitionError::NotRecording
                    | RecognitionError::NoAudio => StatusCode::BAD_REQUEST,
                };
                (status, e.code())
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict(_) => (StatusCode::BAD_REQUEST, "conflict"),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict("email") => AppError::Conflict("User already exists".into()),
            StoreError::Conflict(field) => AppError::Conflict(format!("That {} is already taken", field)),
            StoreError::Backend(e) => AppError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::Validation(err.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
            AppError::Verification(e) => {
                warn!("Verification failed: {:?}", e);
                self.to_string()
            }
            AppError::Chat(e) => {
                warn!("Chat request failed: {:?}", e);
                e.public_message()
            }
            AppError::Recognition(e) => {
                warn!("Speech recognition failed: {:?}", e);
                e.public_message()
            }
            _ => self.to_string(),
        };

        let body = json!({
            "status": status.as_u16(),
            "code": code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
