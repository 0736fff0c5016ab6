//! JWT Token Service
//!
//! Issues and validates the two kinds of session tokens: short-lived access
//! tokens for API calls and long-lived refresh tokens used only to mint new
//! access tokens. Validation is stateless: signature and expiry are checked on
//! every call.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const ISSUER: &str = "ora-server";

/// Capability carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT Claims structure containing the identity reference and token metadata
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User unique identifier
    pub sub: Uuid,
    /// Access or refresh capability
    pub typ: TokenKind,
    /// Token issued at timestamp
    pub iat: i64,
    /// Token expiration timestamp
    pub exp: i64,
    /// Token issuer
    pub iss: String,
}

/// Reasons a presented credential is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("The token has expired")]
    Expired,
    #[error("Invalid token")]
    InvalidSignature,
    #[error("Missing authorization token")]
    MissingCredential,
    #[error("Token type not accepted here")]
    WrongTokenType,
}

impl AuthError {
    /// Machine-readable code used in the 401 body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Expired => "token_expired",
            AuthError::InvalidSignature => "token_invalid",
            AuthError::MissingCredential => "token_missing",
            AuthError::WrongTokenType => "token_wrong_type",
        }
    }
}

/// JWT Service for token operations
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtService {
    /// Create a new JWT service with the provided secret and token lifetimes
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());

        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;

        Self {
            encoding_key,
            decoding_key,
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Lifetime of a freshly issued token of the given kind.
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    /// Issue a signed token for a user
    pub fn issue(&self, user_id: Uuid, kind: TokenKind) -> Result<String> {
        self.issue_with_ttl(user_id, kind, self.ttl(kind))
    }

    pub(crate) fn issue_with_ttl(&self, user_id: Uuid, kind: TokenKind, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            typ: kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: ISSUER.to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("Failed to encode JWT token")
    }

    /// Validate a token and require the given capability.
    ///
    /// Signature is verified before expiry, so a tampered token that is also
    /// expired reports `InvalidSignature`.
    pub fn validate(&self, token: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidSignature,
            }
        })?;

        if data.claims.typ != kind {
            return Err(AuthError::WrongTokenType);
        }
        Ok(data.claims)
    }
}
