use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::errors::PodError;
use crate::http::context::WebContext;

/// `GET /twt/<hash>` — single post as JSON when `Accept: application/json`
/// (spec §6); otherwise a plain-text rendering, since the core has no
/// template layer to hand this off to.
pub async fn handle_twt(
    State(ctx): State<WebContext>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, PodError> {
    let Some(post) = ctx.cache.lookup(&hash).await else {
        return Ok((StatusCode::NOT_FOUND, "post not found").into_response());
    };

    let wants_json = headers.get("accept").and_then(|v| v.to_str().ok()).map(|v| v.contains("application/json")).unwrap_or(false);

    if wants_json {
        Ok(Json(post).into_response())
    } else {
        Ok(post.raw_text.into_response())
    }
}
