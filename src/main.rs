//! # Transcribe Relay - Main Application Entry Point
//!
//! A credential-hiding relay in front of a speech-to-text service. Clients
//! talk to this server; only this server holds the upstream API key.
//!
//! ## Relay Modes:
//! - **Batch**: `POST /transcribe` with base64 audio, answered with `{"text": ...}`
//! - **Stream**: WebSocket upgrade on `/transcribe-stream`, bridged frame by
//!   frame to an upstream streaming socket
//!
//! ## Application Architecture:
//! - **config**: Loads configuration (defaults, config.toml, environment)
//! - **state**: Shared state handed to every handler and session
//! - **models**: Model allow-list and fallback resolution
//! - **upstream**: Client for the upstream batch and streaming endpoints
//! - **handlers**: Routing and the batch relay
//! - **websocket** / **stream**: The stream bridge actor and its session state
//! - **health**: Health and metrics endpoints
//! - **error**: Client-visible and upstream error types

mod config;
mod error;
mod handlers;
mod health;
mod models;
mod state;
mod stream;
mod upstream;
mod websocket;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup order:
/// 1. `.env` and tracing
/// 2. Configuration load and validation (invalid config exits the process)
/// 3. Shared state, including the upstream client
/// 4. HTTP server with both relay modes on one listener
/// 5. Graceful stop on SIGTERM/SIGINT
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting transcribe-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (default model {}, allowed {:?})",
        config.server.host, config.server.port, config.models.default_model, config.models.allowed
    );
    if config.upstream.api_key().is_none() {
        error!("DEEPGRAM_API_KEY is not set; every transcription request will fail");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config).context("Failed to build upstream client")?;

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins when set; otherwise debug for this crate, info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcribe_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
