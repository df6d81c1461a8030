//! # Transcription Handler
//!
//! `POST /v1/audio/transcriptions`, multipart form compatible with the OpenAI audio API.
//!
//! ## Order of checks:
//! 1. **Admission**: another job running → 429 (no waiting)
//! 2. **Model**: nothing loaded → 503, before the upload is even read
//! 3. **Upload**: read the form with a size cap, decode the audio → 400 on any problem
//! 4. **Run**: buffered (one body) or streaming (NDJSON), chosen by `stream`
//!
//! The admission permit is taken first and held until the job ends, including while the upload
//! is read, so a second request arriving mid-upload is refused as well.

use crate::audio;
use crate::error::{AppError, AppResult};
use crate::output::{render, Rendered};
use crate::state::AppState;
use crate::transcription::stream::NDJSON_CONTENT_TYPE;
use crate::transcription::{
    run_buffered, run_streaming, AbortFlag, DiarizationJob, JobContext, TranscriptionRequest,
};
use actix_multipart::Multipart;
use actix_web::http::header::{CACHE_CONTROL, CONNECTION};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use std::collections::HashMap;

/// Largest accepted upload, summed over all form parts.
pub const MAX_UPLOAD_SIZE: usize = 100 << 20;

/// Text fields plus the raw `file` part.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub file: Option<Vec<u8>>,
}

/// Drain the multipart body, failing as soon as more than `limit` bytes arrive.
pub async fn read_form(mut payload: Multipart, limit: usize) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    let mut total = 0usize;

    while let Some(field) = payload.next().await {
        let mut field =
            field.map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .unwrap_or_default()
            .to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?;
            total += chunk.len();
            if total > limit {
                return Err(AppError::BadRequest(format!(
                    "upload exceeds the maximum size of {} bytes",
                    limit
                )));
            }
            data.extend_from_slice(&chunk);
        }

        if name == "file" {
            form.file = Some(data);
        } else if !name.is_empty() {
            form.fields.insert(name, String::from_utf8_lossy(&data).into_owned());
        }
    }

    Ok(form)
}

/// `POST /v1/audio/transcriptions`
pub async fn create_transcription(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let permit = state.models.try_begin_job().map_err(|e| {
        state.jobs.record_rejected_busy();
        tracing::debug!("Transcription rejected, engine busy");
        AppError::from(e)
    })?;
    let model = permit.require_model()?.to_string();

    let form = read_form(payload, MAX_UPLOAD_SIZE).await?;
    let file = form
        .file
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing or invalid 'file' field".to_string()))?;

    let mut request = TranscriptionRequest::from_fields(&form.fields);
    request.options.verbose = state.config.engine.verbose;

    let enhance = request.enhance_audio;
    let samples = web::block(move || audio::decode(&file, enhance))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let ctx = JobContext::new(state.jobs.clone());
    tracing::info!(
        job_id = %ctx.id,
        model = %model,
        stream = request.stream,
        format = ?request.response_format,
        duration_s = samples.len() as f64 / audio::TARGET_SAMPLE_RATE as f64,
        "Transcription admitted"
    );

    if request.stream {
        let body = run_streaming(ctx, permit, samples, request.options);
        return Ok(HttpResponse::Ok()
            .content_type(NDJSON_CONTENT_TYPE)
            .insert_header((CACHE_CONTROL, "no-cache"))
            // actix-http manages this header itself and strips it from HTTP/1.1 responses;
            // keep-alive is the HTTP/1.1 default either way.
            .insert_header((CONNECTION, "keep-alive"))
            .streaming(body));
    }

    let diarization = request.diarize_model.clone().map(|model| DiarizationJob {
        diarizer: state.diarizer.clone(),
        model,
    });

    // Dropped with this future if the client goes away mid-job
    let abort = AbortFlag::new();
    let disconnect = abort.on_drop();
    let result = run_buffered(ctx, permit, samples, request.options, diarization, abort).await;
    disconnect.disarm();

    let transcript = result?;
    Ok(match render(request.response_format, &transcript) {
        Rendered::Json(body) => HttpResponse::Ok().json(body),
        Rendered::Text(body) => HttpResponse::Ok()
            .content_type(request.response_format.content_type())
            .body(body),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/audio/transcriptions", web::post().to(create_transcription));
}
