use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Form;
use serde::Deserialize;

use crate::errors::PodError;
use crate::http::context::WebContext;

#[derive(Deserialize)]
pub struct WebMentionForm {
    pub source: String,
    pub target: String,
}

/// `POST /webmention` — inbound citation (spec §4.H). Accepted without
/// verifying the source first; verification happens asynchronously on the
/// inbox queue.
pub async fn handle_webmention(State(ctx): State<WebContext>, Form(form): Form<WebMentionForm>) -> Result<impl IntoResponse, PodError> {
    if !form.target.starts_with(&ctx.config.base_url) {
        return Ok(StatusCode::BAD_REQUEST);
    }
    if ctx.webmention.enqueue_inbound(form.source, form.target).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Ok(StatusCode::SERVICE_UNAVAILABLE)
    }
}
