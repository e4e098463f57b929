use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::dispatcher::Job;
use crate::errors::PodError;
use crate::http::context::WebContext;
use crate::ipp::{IPP_PUB_HEADER, IPP_SUB_HEADER};

/// `POST /ipp/sub` — `x-ipp-callback` header; 200 on record, 400 on
/// missing/bad callback (spec §4.F/§6).
pub async fn handle_ipp_sub(State(ctx): State<WebContext>, headers: HeaderMap) -> Result<impl IntoResponse, PodError> {
    let callback = headers.get(IPP_SUB_HEADER).and_then(|v| v.to_str().ok());
    if ctx.ipp.record_subscriber(callback).await {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::BAD_REQUEST)
    }
}

/// `POST /ipp/pub` — `x-ipp-uri` header; 202 iff subscribed to a peer
/// whose base URI prefixes the notified URI (spec §9 open question,
/// implemented exactly as observed). Independent of the response: if the
/// feed is cached here and not blocked/local, enqueue a forced fetch.
pub async fn handle_ipp_pub(State(ctx): State<WebContext>, headers: HeaderMap) -> Result<impl IntoResponse, PodError> {
    let Some(uri) = headers.get(IPP_PUB_HEADER).and_then(|v| v.to_str().ok()) else {
        return Ok(StatusCode::BAD_REQUEST);
    };
    let uri = uri.to_string();

    let interested = ctx.ipp.is_interested_in(&uri).await;

    let is_local = uri.starts_with(&ctx.config.base_url);
    let is_blocked = ctx.config.blocked_feeds.matches(&uri);
    if ctx.cache.get_feed(&uri).await.is_some() && !is_local && !is_blocked {
        let fetcher_uri = uri.clone();
        let server = ctx.0.clone();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let fetcher = crate::fetcher::ProtocolFetcher::new(server.http.clone());
                let requests = vec![crate::feed::cache::FetchRequestSpec { uri: fetcher_uri, force: true }];
                server.cache.fetch_feeds(&fetcher, requests, &Default::default(), &server.archive).await;
                Ok(serde_json::json!({ "forced": true }))
            })
        });
        let _ = ctx.dispatcher.dispatch(job).await;
    }

    if interested {
        Ok(StatusCode::ACCEPTED)
    } else {
        Ok(StatusCode::OK)
    }
}
