//! # Session Audio Backend - Main Application Entry Point
//!
//! HTTP service that collects audio clips per session (uploads or remote URLs), merges
//! them into a single MP3 on request and removes the session's storage once the
//! artifact has been delivered. A small client for an external image-generation API
//! rides along.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: shared services and runtime metrics
//! - **session**: session ids, clip storage, URL dedup, merge lifecycle
//! - **audio**: content sniffing, decoding, merging and MP3 encoding
//! - **fetch**: remote clip downloads
//! - **generation**: image-generation job client and job log
//! - **middleware**: request logging and metrics
//! - **handlers** / **health**: HTTP endpoints
//! - **error**: mapping of every failure to a JSON error response

mod audio;
mod config;
mod error;
mod fetch;
mod generation;
mod handlers;
mod health;
mod middleware;
mod session;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        storage_root = %config.storage.root.display(),
        max_clip_bytes = config.limits.max_clip_bytes,
        bitrate_kbps = config.merge.bitrate_kbps,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );
    if config.generation.api_key.is_empty() {
        warn!("No generation API key configured; image generation requests will be rejected upstream");
    }

    let app_state = AppState::new(config.clone()).await?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(vec![actix_web::http::header::CONTENT_DISPOSITION])
            .max_age(3600);

        // Middleware runs bottom-up on the way in
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
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
            // Graceful: in-flight downloads finish, so their sessions are still reclaimed
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging, filtered by `RUST_LOG`.
///
/// Default: `session_audio_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_audio_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGTERM or SIGINT (Ctrl+C).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        // Without any signal source, run until the server exits on its own
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT");
}
