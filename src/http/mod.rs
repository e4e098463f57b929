pub mod context;
pub mod handle_feed;
pub mod handle_info;
pub mod handle_ipp;
pub mod handle_twt;
pub mod handle_webmention;
pub mod handle_websub;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use context::WebContext;

/// Builds the pod's HTTP surface (spec §6): feed/post retrieval plus the
/// three dissemination protocol endpoints.
pub fn build_router(ctx: WebContext) -> Router {
    Router::new()
        .route("/user/:nick/twtxt.txt", get(handle_feed::handle_feed))
        .route("/twt/:hash", get(handle_twt::handle_twt))
        .route("/info", get(handle_info::handle_info))
        .route("/ipp/sub", post(handle_ipp::handle_ipp_sub))
        .route("/ipp/pub", post(handle_ipp::handle_ipp_pub))
        .route("/websub", post(handle_websub::handle_websub))
        .route(
            "/notify",
            get(handle_websub::handle_notify_confirm).post(handle_websub::handle_notify_deliver),
        )
        .route("/webmention", post(handle_webmention::handle_webmention))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
