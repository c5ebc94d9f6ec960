//! # Whisper Gateway - Main Application Entry Point
//!
//! An OpenAI-compatible speech-to-text HTTP service. Clients upload an audio
//! file to `/v1/audio/transcriptions` and get `{"text", "language"}` back,
//! transcribed locally by Whisper models running on Candle.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: actix-web serves requests on async workers
//! - **spawn_blocking**: Model inference is CPU-bound and runs off the workers
//! - **Arc**: Configuration and loaded models are shared by every worker
//! - **RAII**: Uploaded audio is staged to a file that deletes itself
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **error**: Error taxonomy and its HTTP mapping
//! - **state**: Shared configuration, model registry and metrics
//! - **middleware**: API key check, request logging, metrics
//! - **handlers** / **routes**: The HTTP surface
//! - **audio**: Upload staging and container decoding
//! - **transcription**: Engine contract, Whisper engine, registry, request flow

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod routes;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::registry::ModelRegistry;

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Startup order:
/// 1. `.env`, logging, configuration (validated)
/// 2. Every configured model is loaded; any failure aborts startup
/// 3. Only then does the server bind and accept traffic
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    info!("Starting whisper-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        models = ?config.models.keys().collect::<Vec<_>>(),
        staging_dir = %config.transcription.staging_dir().display(),
        "Configuration loaded"
    );

    let registry = ModelRegistry::load(&config.models).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let workers = config.server.workers;
    let app_state = web::Data::new(AppState::new(config, registry));

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let mut server = HttpServer::new(move || {
        // Permissive on purpose: the server binds to loopback by default
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            // Middleware runs bottom-up on requests, so CORS sees the request first
            .wrap(middleware::RequestLogging)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .wrap(cors)
            .configure(routes::configure_routes)
    })
    .disable_signals();

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    let server = server
        .bind(&bind_addr)
        .with_context(|| format!("binding {}", bind_addr))?
        .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Graceful: in-flight transcriptions finish and clean up
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Console logging filtered by `RUST_LOG`
/// (default `whisper_gateway=debug,actix_web=info`).
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_gateway=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("initialising tracing")?;

    Ok(())
}

/// Flip `SHUTDOWN_SIGNAL` on SIGINT (Ctrl+C) or SIGTERM.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("Failed to install signal handlers: {}", e);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once the shutdown flag is set, polling every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
