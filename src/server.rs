//! # Server Module
//!
//! Application state, router assembly, and startup for the journaling API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::jwt::JwtService;
use crate::auth::verification::{self, VerificationCodeCache};
use crate::config::Config;
use crate::database::{DatabaseConfig, DatabaseConnection, MemoryStore, Store, migrations};
use crate::routes;
use crate::services::artifacts::{self, ArtifactStore};
use crate::services::asr::{HttpTranscriber, Transcriber};
use crate::services::chat_client::{ChatBackend, ChatClient};
use crate::services::mailer::{CodeMailer, LogMailer};
use crate::services::recorder::{CommandAudioSource, Recorder};
use crate::services::tts::{HttpSpeechSynthesizer, SpeechSynthesizer, Voice};

const CODE_PURGE_INTERVAL_SECS: u64 = 60;
const ARTIFACT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub jwt_service: Arc<JwtService>,
    pub store: Arc<dyn Store>,
    pub codes: Arc<VerificationCodeCache>,
    pub mailer: Arc<dyn CodeMailer>,
    pub chat: Arc<dyn ChatBackend>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub asr: Arc<dyn Transcriber>,
    pub recorder: Arc<Recorder>,
    pub artifacts: Arc<ArtifactStore>,
    pub default_voice: Voice,
}

/// Assemble every route group behind the shared tracing and CORS layers.
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    Router::new()
        .route("/ping", get(routes::health::ping))
        .merge(routes::auth::create_auth_routes(&state))
        .merge(routes::chat::create_chat_routes(&state))
        .merge(routes::speech::create_speech_routes(&state))
        .merge(routes::conversations::create_conversation_routes(&state))
        .merge(routes::community::create_community_routes(&state))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(origins)
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([
                        header::ORIGIN,
                        header::CONTENT_TYPE,
                        header::ACCEPT,
                        header::AUTHORIZATION,
                    ])
                    .allow_credentials(true),
            ),
        )
        .with_state(state)
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database {
        Some(settings) => {
            let db_config = DatabaseConfig::from_url(&settings.url)?
                .with_pool_size(settings.max_connections)
                .with_tls(settings.use_tls);
            let connection = DatabaseConnection::new(db_config).await?;
            migrations::run_migrations(connection.pool()).await?;
            Ok(Arc::new(connection))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data will not persist");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Starts the HTTP server and its background maintenance tasks.
pub async fn start(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    let jwt_service = Arc::new(JwtService::new(
        &config.auth.jwt_secret,
        chrono::Duration::seconds(config.auth.access_ttl_secs),
        chrono::Duration::seconds(config.auth.refresh_ttl_secs),
    ));

    let codes = Arc::new(VerificationCodeCache::new(Duration::from_secs(
        config.auth.code_ttl_secs,
    )));
    tokio::spawn(verification::run_purge_loop(
        Arc::clone(&codes),
        CODE_PURGE_INTERVAL_SECS,
    ));

    let artifacts = Arc::new(
        ArtifactStore::open(&config.audio.dir)
            .await
            .with_context(|| format!("Failed to open audio dir {}", config.audio.dir.display()))?,
    );
    match config.audio.retention {
        Some(retention) => {
            tokio::spawn(artifacts::run_sweep_loop(
                Arc::clone(&artifacts),
                retention,
                ARTIFACT_SWEEP_INTERVAL,
            ));
        }
        None => tracing::info!("Audio retention not set; synthesized files are kept"),
    }

    let chat = ChatClient::new(
        config.chat.api_url.clone(),
        config.chat.api_key.clone(),
        config.chat.timeout,
    )?
    .with_model(config.chat.model.clone());

    let tts = HttpSpeechSynthesizer::new(
        config.tts.api_url.clone(),
        config.tts.api_key.clone(),
        config.tts.model.clone(),
        config.tts.timeout,
        Arc::clone(&artifacts),
    )?;

    let asr = HttpTranscriber::new(
        config.asr.api_url.clone(),
        config.asr.api_key.clone(),
        config.asr.model.clone(),
        config.asr.timeout,
    )?;

    if config.asr.capture_command.is_none() {
        tracing::info!("ASR_CAPTURE_COMMAND not set; live recording is unavailable");
    }
    let recorder = Recorder::new(Arc::new(CommandAudioSource::new(
        config.asr.capture_command.clone(),
        config.asr.sample_rate,
    )));

    let app_state = AppState {
        jwt_service,
        store,
        codes,
        mailer: Arc::new(LogMailer),
        chat: Arc::new(chat),
        tts: Arc::new(tts),
        asr: Arc::new(asr),
        recorder: Arc::new(recorder),
        artifacts,
        default_voice: config.tts.default_voice,
    };

    let app = build_router(app_state, &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("🚀 Ora server listening on http://{}", addr);
    tracing::info!("🏥 Health check available at http://{}/ping", addr);
    tracing::info!("🤖 Chat model: {}", config.chat.model);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
