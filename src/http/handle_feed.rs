use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::errors::PodError;
use crate::feed::format::{format_post, FormatMode};
use crate::http::context::WebContext;

/// `GET /user/<nick>/twtxt.txt` — raw feed bytes, honouring
/// `If-Modified-Since` (spec §6).
pub async fn handle_feed(
    State(ctx): State<WebContext>,
    Path(nick): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, PodError> {
    let uri = format!("{}/user/{}/twtxt.txt", ctx.config.base_url.trim_end_matches('/'), nick);
    let Some(feed) = ctx.cache.get_feed(&uri).await else {
        return Ok((StatusCode::NOT_FOUND, "feed not found").into_response());
    };

    if let (Some(last_modified), Some(if_modified_since)) =
        (&feed.last_modified, headers.get("if-modified-since").and_then(|v| v.to_str().ok()))
    {
        if last_modified == if_modified_since {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let mut body = String::new();
    body.push_str(&format!("# nick = {}\n", feed.twter.nick));
    body.push_str(&format!("# url = {}\n", feed.twter.uri));

    for post in feed.posts.iter().rev() {
        let rendered = format_post(post, FormatMode::Text, &ctx.config.base_url);
        body.push_str(&format!(
            "{}\t{}\n",
            post.created.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            rendered
        ));
    }

    let mut response = body.into_response();
    if let Some(last_modified) = feed.last_modified {
        response.headers_mut().insert(
            "last-modified",
            last_modified.parse().unwrap_or_else(|_| "".parse().unwrap()),
        );
    }
    response.headers_mut().insert("content-type", "text/plain; charset=utf-8".parse().unwrap());
    Ok(response)
}
