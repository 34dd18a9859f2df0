//! Keyword inspection endpoints.
//!
//! - `GET /api/v1/keywords`: the same capability report clients get from `describe`
//! - `GET /api/v1/keywords/{name}`: the detector configuration a selection of
//!   `name` would produce right now

use crate::error::AppResult;
use crate::state::AppState;
use crate::wake::info::describe;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::debug;

pub async fn list_keywords(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let info = describe(&state.registry);
    debug!(count = info.model_count(), "Listing keywords");
    Ok(HttpResponse::Ok().json(info))
}

pub async fn get_keyword(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let name = path.into_inner();
    let resolved = state.registry.resolve(&name)?;

    Ok(HttpResponse::Ok().json(json!({
        "name": resolved.keyword,
        "model_path": resolved.model_path,
        "resource_path": resolved.resource_path,
        "sensitivity": resolved.sensitivity_string(),
        "sensitivities": resolved.sensitivities,
        "audio_gain": resolved.audio_gain,
        "apply_frontend": resolved.apply_frontend,
        "backend": state.detectors.name()
    })))
}
