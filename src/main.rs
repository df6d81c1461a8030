//! # whisper-serve - Main Application Entry Point
//!
//! Local speech-to-text server exposing a whisper.cpp model through an OpenAI-compatible
//! `/v1/audio/transcriptions` API.
//!
//! ## Application Architecture:
//! - **config**: configuration (TOML file + environment variables)
//! - **state**: shared application state, metrics and job counters
//! - **transcription**: engine, model lifecycle, admission, orchestration, streaming
//! - **audio**: WAV decoding and optional enhancement
//! - **diarization**: external speaker diarization and segment merging
//! - **output**: json / verbose_json / text / srt / vtt rendering
//! - **health**: liveness, readiness and metrics endpoints
//! - **middleware**: request logging and metrics
//! - **handlers**: model management and transcription endpoints
//! - **error**: error types and HTTP error responses

mod audio;
mod config;
mod diarization;
mod error;
mod handlers;
mod health;
mod middleware;
mod output;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use diarization::SubprocessDiarizer;
use state::AppState;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{ModelManager, WhisperLoader};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting whisper-serve v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        use_gpu = config.engine.use_gpu,
        "Configuration loaded"
    );

    let loader = WhisperLoader {
        use_gpu: config.engine.use_gpu,
        gpu_device: config.engine.gpu_device,
    };
    let models = Arc::new(ModelManager::new(Arc::new(loader)));

    // A bad startup model is not fatal; the server comes up unloaded and a model can be
    // loaded later through the API.
    match config.startup_model() {
        Some(path) => {
            if let Err(e) = models.load(&path).await {
                error!(path = %path.display(), error = %e, "Startup model failed to load");
            }
        }
        None => warn!("No engine.model_path configured; starting without a model"),
    }

    let diarizer = SubprocessDiarizer::new(config.diarization.binary_path.as_ref().map(PathBuf::from));
    let bind_addr = config.bind_addr();
    let app_state = AppState::new(config, models, Arc::new(diarizer));

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
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .route("/health", web::get().to(health::health_check))
            .route("/ready", web::get().to(health::readiness))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .configure(handlers::models::configure)
            .configure(handlers::transcriptions::configure)
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
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls filtering; default `whisper_serve=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_serve=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Flip [`SHUTDOWN_SIGNAL`] on SIGTERM or SIGINT.
#[cfg(unix)]
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
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

#[cfg(not(unix))]
fn setup_signal_handlers() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
            SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
        }
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
