use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Form;
use serde::Deserialize;

use crate::errors::PodError;
use crate::http::context::WebContext;

#[derive(Deserialize)]
pub struct HubForm {
    #[serde(rename = "hub.mode")]
    pub mode: String,
    #[serde(rename = "hub.topic")]
    pub topic: String,
    #[serde(rename = "hub.callback")]
    pub callback: String,
}

/// `POST /websub` — hub endpoint (spec §4.G, §6).
pub async fn handle_websub(State(ctx): State<WebContext>, Form(form): Form<HubForm>) -> Result<impl IntoResponse, PodError> {
    match ctx.websub.handle_hub_request(&form.mode, &form.topic, &form.callback).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(_) => Ok(StatusCode::BAD_REQUEST),
    }
}

#[derive(Deserialize)]
pub struct NotifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<u64>,
}

/// `GET /notify` — subscriber-side verification challenge.
pub async fn handle_notify_confirm(State(ctx): State<WebContext>, Query(query): Query<NotifyQuery>) -> Result<impl IntoResponse, PodError> {
    let (Some(mode), Some(challenge)) = (query.mode, query.challenge) else {
        return Ok(StatusCode::BAD_REQUEST.into_response());
    };
    match ctx.websub.handle_confirmation(&mode, query.topic.as_deref(), &challenge, query.lease_seconds).await {
        Some(body) => Ok((StatusCode::ACCEPTED, body).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

/// `POST /notify` — subscriber-side notification delivery. The hub posts
/// the updated topic URI as the raw request body (see
/// `WebSubState::notify_subscribers`).
pub async fn handle_notify_deliver(State(ctx): State<WebContext>, body: String) -> Result<impl IntoResponse, PodError> {
    if !body.trim().is_empty() {
        ctx.websub.enqueue_notification(body.trim().to_string()).await;
    }
    Ok(StatusCode::ACCEPTED)
}
