//! # Model Management Handlers
//!
//! ## Endpoints:
//! - `GET /v1/models` - OpenAI-style list with the loaded model, if any
//! - `POST /v1/models/load` - load a model file (`{"path": "..."}`)
//! - `DELETE /v1/models` - unload the current model
//!
//! Load and unload wait for a running transcription to finish before they take effect.

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Request body for `POST /v1/models/load`.
#[derive(Debug, Deserialize)]
pub struct LoadModelRequest {
    #[serde(default)]
    pub path: String,
}

/// One entry of the model list.
#[derive(Debug, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

/// `GET /v1/models`
pub async fn list_models(state: web::Data<AppState>) -> HttpResponse {
    let status = state.models.status().await;

    let data: Vec<ModelObject> = status
        .name
        .into_iter()
        .map(|id| ModelObject {
            id,
            object: "model",
            created: chrono::Utc::now().timestamp(),
            owned_by: "local",
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "object": "list",
        "data": data,
    }))
}

/// `POST /v1/models/load`
///
/// The body is parsed by hand so a malformed one maps to our 400 shape rather than actix's
/// default JSON error.
pub async fn load_model(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let request: LoadModelRequest = serde_json::from_slice(&body)?;
    let path = request.path.trim();
    if path.is_empty() {
        return Err(AppError::BadRequest("'path' is required".to_string()));
    }

    tracing::info!(path = %path, "Model load requested");
    let name = state.models.load(path).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "loaded",
        "model": name,
    })))
}

/// `DELETE /v1/models`
pub async fn unload_model(state: web::Data<AppState>) -> HttpResponse {
    state.models.unload().await;
    HttpResponse::Ok().json(json!({ "status": "unloaded" }))
}

/// Register the model routes under `/v1/models`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/models")
            .route("", web::get().to(list_models))
            .route("", web::delete().to(unload_model))
            .route("/load", web::post().to(load_model)),
    );
}
