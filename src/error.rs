//! # Error Handling
//!
//! Custom error types for the HTTP surface and how they map onto responses.
//!
//! ## Error Taxonomy:
//! - **BadRequest** → 400: malformed form, missing file, unparseable audio, oversized upload
//! - **Busy** → 429: another transcription job holds the engine
//! - **Unavailable** → 503: the engine lock was acquired but no model is loaded
//! - **EngineFailure** → 500: the inference call failed for a reason other than abort
//! - **Aborted**: the client disconnected mid-job; nobody is left to read the response
//!
//! Domain modules (`transcription`, `audio`, `diarization`) report their own `thiserror`
//! enums; handlers convert them into `AppError` at the boundary with `?`.

use crate::audio::AudioError;
use crate::transcription::{AdmissionError, EngineError, JobError};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("missing or invalid 'file' field".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors that are not the engine's fault
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// The engine is busy with another transcription job
    Busy(String),

    /// No model is loaded
    Unavailable(String),

    /// The inference engine (or model initialisation) failed
    EngineFailure(String),

    /// The client went away while its job was running
    Aborted,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Busy(msg) => write!(f, "Busy: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            AppError::EngineFailure(msg) => write!(f, "Engine failure: {}", msg),
            AppError::Aborted => write!(f, "Client disconnected"),
        }
    }
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    fn error_type(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Busy(_) => "busy",
            AppError::Unavailable(_) => "unavailable",
            AppError::EngineFailure(_) => "engine_failure",
            AppError::Aborted => "aborted",
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::Busy(msg)
            | AppError::Unavailable(msg)
            | AppError::EngineFailure(msg) => msg.clone(),
            AppError::Aborted => "client disconnected".to_string(),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "busy",
///     "message": "server is busy with another transcription",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
///
/// `Aborted` never reaches a live client: the connection is already gone, so an empty body is
/// produced only to satisfy the handler signature.
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::EngineFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Busy(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            // 499 "client closed request"; nobody reads it
            AppError::Aborted => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, AppError::Aborted) {
            return HttpResponse::build(self.status_code()).finish();
        }

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// JSON parsing errors are almost always the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Busy => {
                AppError::Busy("server is busy with another transcription".to_string())
            }
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotLoaded => AppError::Unavailable("no model loaded".to_string()),
            EngineError::Init { .. } => {
                AppError::EngineFailure(format!("failed to load model: {}", err))
            }
            EngineError::Inference(_) | EngineError::Panicked(_) => {
                AppError::EngineFailure(format!("transcription failed: {}", err))
            }
        }
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Aborted => AppError::Aborted,
            JobError::Engine(e) => e.into(),
        }
    }
}

impl From<AudioError> for AppError {
    fn from(err: AudioError) -> Self {
        AppError::BadRequest(format!("invalid audio file: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
