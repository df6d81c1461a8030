//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_ENGINE__MODEL_PATH, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub diarization: DiarizationConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (default)
/// - `host = "0.0.0.0"`: Accept connections from any IP address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech engine settings.
///
/// ## Fields:
/// - `model_path`: GGML model loaded at startup; `None` starts the server unloaded
/// - `use_gpu`: Let whisper.cpp offload to a GPU backend when one was compiled in
/// - `gpu_device`: Backend device index used when `use_gpu` is set
/// - `verbose`: Forward whisper.cpp's own progress/timestamp printing to stderr
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub model_path: Option<String>,
    pub use_gpu: bool,
    pub gpu_device: i32,
    pub verbose: bool,
}

/// Speaker diarization settings.
///
/// `binary_path` pins the `sona-diarize` executable; when unset the usual lookup
/// (PATH, `SONA_DIARIZE_PATH`, next to this binary) applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiarizationConfig {
    pub binary_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 11531,
            },
            engine: EngineConfig {
                model_path: None,
                use_gpu: true,
                gpu_device: 0,
                verbose: false,
            },
            diarization: DiarizationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_ENGINE__MODEL_PATH=/models/ggml-base.bin`: Load a model at startup
    /// - `APP_DIARIZATION__BINARY_PATH=/opt/sona/sona-diarize`
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates sections so `model_path` keeps its own underscore
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if let Some(path) = &self.engine.model_path {
            if path.trim().is_empty() {
                return Err(anyhow::anyhow!("engine.model_path is set but empty"));
            }
        }

        if self.engine.gpu_device < 0 {
            return Err(anyhow::anyhow!("engine.gpu_device must not be negative"));
        }

        Ok(())
    }

    /// Socket address string for `HttpServer::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Model to load before accepting requests, if any.
    pub fn startup_model(&self) -> Option<PathBuf> {
        self.engine.model_path.as_ref().map(PathBuf::from)
    }
}
