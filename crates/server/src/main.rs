//! Classroom translation broker entry point

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use classbridge_config::{load_settings, Settings};
use classbridge_pipeline::{
    ClientSpeechSynthesizer, DecliningTranscoder, DisabledSpeechToText, PassthroughTranslator,
    TtsRouter,
};
use classbridge_server::state::BrokerBuilder;
use classbridge_server::supervisor::Supervisor;
use classbridge_server::{create_router, init_metrics};
use classbridge_storage::{InMemorySessionStore, InMemoryTranslationStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("CLASSBRIDGE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);

    tracing::info!("Starting classbridge v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?settings.environment,
        config = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    if settings.observability.metrics_enabled {
        init_metrics();
        tracing::info!("Prometheus metrics at /metrics");
    }

    // The bundled store backs `memory://`; anything else must be wired in
    // by an embedder.
    let database_url = settings.storage.database_url.clone();
    if !database_url.starts_with("memory://") {
        return Err(format!(
            "unsupported storage backend: {database_url} (only memory:// is bundled)"
        )
        .into());
    }
    tracing::info!(database_url = %database_url, "Using in-memory session store");

    // Fallback providers keep the broker fully functional without
    // vendors: students get source text and client-side speech.
    let mut tts = TtsRouter::new(
        settings.providers.default_tts_service.clone(),
        settings.providers.fallback_tts_service.clone(),
        settings.timeouts.provider_timeout(),
    );
    tts.register(Arc::new(ClientSpeechSynthesizer));
    if settings.providers.stt == "none" {
        tracing::warn!("No STT provider configured, audio frames will be dropped");
    }

    let host: std::net::IpAddr = settings.server.host.parse()?;
    let port = settings.server.port;

    let state = BrokerBuilder {
        settings,
        sessions: Arc::new(InMemorySessionStore::new()),
        translations: Arc::new(InMemoryTranslationStore::new()),
        stt: Arc::new(DisabledSpeechToText),
        translator: Arc::new(PassthroughTranslator),
        tts,
        transcoder: Arc::new(DecliningTranscoder),
    }
    .build();

    state.core.restore_active_codes().await;

    // Startup visibility into what the previous run left behind
    let recent = state
        .core
        .lifecycle
        .classify_recent(20, chrono::Utc::now())
        .await;
    for (record, classification) in &recent {
        tracing::info!(
            session_id = %record.session_id,
            active = record.is_active,
            students = record.students_count,
            real = classification.is_real,
            reason = classification.reason.as_str(),
            "Recent session"
        );
    }

    let supervisor = Supervisor::start(state.core.clone());
    let app = create_router(state);

    let addr = SocketAddr::from((host, port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("classbridge={},tower_http=info", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
