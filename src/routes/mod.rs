// # Routes Module
//
// HTTP route handlers, grouped by API area. Each module exposes a
// `create_*_routes` function that `server.rs` merges into the main router.

/// Health check endpoint
pub mod health;

/// Verification codes, registration, login, and token refresh
pub mod auth;

/// Chat completion, text regeneration, and voices
pub mod chat;

/// Transcription, live recording, and audio playback
pub mod speech;

/// Conversation CRUD
pub mod conversations;

/// Community feed
pub mod community;
