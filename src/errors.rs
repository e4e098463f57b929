use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Error taxonomy for the parse/fetch pipeline (spec §7). These are
/// recorded on a `CachedFeed` or used to decide retry/poison behaviour;
/// they are never surfaced directly to an HTTP client.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("could not parse token at offset {offset}")]
    ParseToken { offset: usize },

    #[error("input does not resemble a twtxt feed")]
    InvalidFeed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("feed is permanently dead (HTTP {status})")]
    PermanentlyDead { status: u16 },

    #[error("peer unavailable")]
    PeerUnavailable,

    #[error("dispatcher not active")]
    DispatcherInactive,

    #[error("persisted cache is corrupt or from an incompatible schema version")]
    PersistenceCorrupt,
}

impl FeedError {
    /// HTTP status codes the spec calls out as "permanent" (feed death).
    pub fn is_permanent_status(status: u16) -> bool {
        matches!(status, 401 | 402 | 403 | 404 | 407 | 410 | 451)
    }
}

/// Top-level error wrapper for axum handlers, in the teacher's style:
/// any error convertible to `anyhow::Error` is logged and turned into a
/// generic 500, keeping handler bodies free of match arms on error kind.
#[derive(Debug)]
pub struct PodError(pub anyhow::Error);

impl<E> From<E> for PodError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for PodError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self.0, "internal server error");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
    }
}
