//! # Voice Translator - Main Application Entry Point
//!
//! A small web service: upload a recording, pick a target language, get back the
//! transcript and its translation.
//!
//! ## Application Architecture:
//! - **config**: Configuration (defaults, `config.toml`, `APP_*` environment variables)
//! - **state**: Shared application state, the loaded models and request metrics
//! - **handlers**: The upload form and the transcribe-and-translate endpoint
//! - **health**: `GET /health`
//! - **middleware**: Request logging and metrics
//! - **error**: Error type and its HTTP JSON rendering
//! - **languages**: Supported target languages
//! - **upload**: Request-scoped scratch files
//! - **audio**: Decoding uploads to 16 kHz mono PCM
//! - **transcription**: Whisper speech-to-text
//! - **translation**: MADLAD-400 translation with beam search
//! - **hub / device**: Model downloads and compute device selection
//!
//! ## Startup order:
//! Both models are downloaded and loaded before the listener is bound. If either
//! fails, the process exits with an error instead of serving requests it cannot
//! answer.

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod hub;
mod languages;
mod middleware;
mod state;
mod transcription;
mod translation;
mod upload;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperTranscriber;
use translation::MadladTranslator;

#[actix_web::main]
async fn main() -> Result<()> {
    // Fine if there is no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    std::fs::create_dir_all(&config.upload.dir).with_context(|| {
        format!("failed to create upload directory {}", config.upload.dir.display())
    })?;

    // validate() has already checked the preference parses
    let device = config
        .models
        .device
        .parse::<device::DevicePreference>()
        .unwrap_or_default()
        .select();

    let api = hub::build_api()?;
    let speech_to_text = WhisperTranscriber::load(&config.models, device.clone(), &api)
        .await
        .context("failed to load speech-to-text model")?;
    let translator = MadladTranslator::load(&config.translation, device, &api)
        .await
        .context("failed to load translation model")?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, Arc::new(speech_to_text), Arc::new(translator));
    info!("Models ready: {}", app_state.model_info());

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Multipart uploads are bounded by upload.max_file_size_mb in the handler
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
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
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls what gets logged; defaults to
/// "voice_translator=debug,actix_web=info".
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_translator=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
