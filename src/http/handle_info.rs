use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::errors::PodError;
use crate::http::context::WebContext;

/// `GET /info` — `{name, description, software_version}` (spec §6).
pub async fn handle_info(State(ctx): State<WebContext>) -> Result<impl IntoResponse, PodError> {
    Ok(Json(json!({
        "name": ctx.config.base_url,
        "description": "twtd pod",
        "software_version": ctx.config.version,
    })))
}
