//! # Ora Server
//!
//! Backend for a conversational journaling app, built with Rust, Axum, and
//! Tokio. Users register with an emailed verification code, talk through their
//! memories with a chat model, hear replies as synthesized speech, dictate
//! entries through speech recognition, and share them on a community feed.
//!
//! ## Architecture
//! - `server`: application state, router assembly, startup
//! - `config`: environment configuration
//! - `auth`: JWT tokens, password hashing, verification codes, middleware
//! - `database`: the `Store` seam with PostgreSQL and in-memory backends
//! - `services`: chat, speech synthesis and recognition, live capture, audio files
//! - `routes`: HTTP handlers grouped by API area
//!
//! ## Environment Setup
//! Put settings in `.env` or the process environment. Only `CHAT_API_KEY` is
//! required; without `DATABASE_URL` the server runs on an in-memory store.
//!
//! ## Running the Server
//! ```bash
//! cargo run
//! curl http://localhost:3002/ping
//! ```

mod auth;
mod config;
mod database;
mod error;
mod extract;
mod routes;
mod server;
mod services;

#[cfg(test)]
mod test_support;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false) // Don't show module targets for cleaner output
                .compact(),
        )
        .init();

    tracing::info!("🏁 Starting Ora Server...");
    tracing::info!("📦 Package: {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tracing::info!("🏗️  Build profile: {}", if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    });

    let config = config::Config::from_env()?;
    server::start(config).await
}
