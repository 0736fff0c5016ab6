//! # Services Module
//!
//! Outbound integrations used by the route handlers: the chat model, speech
//! synthesis and recognition, live capture, code delivery, and the on-disk
//! audio store.

pub mod artifacts;
pub mod asr;
pub mod chat_client;
pub mod mailer;
pub mod recorder;
pub mod tts;
