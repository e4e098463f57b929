//! Protocol-agnostic feed download (spec §4.I). One GET per supported
//! scheme, a size-limited body reader, and enough header plumbing for the
//! cache to do conditional fetches and peer/hub discovery.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::FeedError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Gopher,
    Gemini,
}

pub fn protocol_for(uri: &str) -> Option<Protocol> {
    let scheme = uri.split_once("://")?.0.to_lowercase();
    match scheme.as_str() {
        "http" | "https" => Some(Protocol::Http),
        "gopher" => Some(Protocol::Gopher),
        "gemini" => Some(Protocol::Gemini),
        _ => None,
    }
}

#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub uri: String,
    pub if_modified_since: Option<String>,
    pub user_agent: String,
    pub max_bytes: u64,
    pub timeout: Duration,
}

/// Headers the cache cares about for peer/hub discovery
/// (`DetectClientFromResponse`, WebSub auto-subscribe).
#[derive(Clone, Debug, Default)]
pub struct HeaderSnapshot {
    pub powered_by: Option<String>,
    pub link_hub: Option<String>,
    pub link_self: Option<String>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched {
        body: String,
        status: u16,
        last_modified: Option<String>,
        /// Present and different from the requested URI iff redirects moved
        /// the feed (spec §9 open question: the cache re-keys on this).
        effective_url: String,
        headers: HeaderSnapshot,
    },
    NotModified,
    PermanentlyDead {
        status: u16,
    },
    Error(FeedError),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome;
}

/// Production fetcher: reqwest for HTTP(S), raw TCP for Gopher, TLS for
/// Gemini. Each protocol path enforces `max_bytes` itself since none of
/// the three hand us a `Content-Length` we can trust.
pub struct ProtocolFetcher {
    http: reqwest::Client,
}

impl ProtocolFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Fetcher for ProtocolFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        match protocol_for(&request.uri) {
            Some(Protocol::Http) => self.fetch_http(request).await,
            Some(Protocol::Gopher) => fetch_gopher(request).await,
            Some(Protocol::Gemini) => fetch_gemini(request).await,
            None => FetchOutcome::Error(FeedError::Transport(format!(
                "unsupported scheme in {}",
                request.uri
            ))),
        }
    }
}

impl ProtocolFetcher {
    async fn fetch_http(&self, request: &FetchRequest) -> FetchOutcome {
        let mut builder = self
            .http
            .get(&request.uri)
            .timeout(request.timeout)
            .header("User-Agent", &request.user_agent);
        if let Some(ims) = &request.if_modified_since {
            builder = builder.header("If-Modified-Since", ims);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return FetchOutcome::Error(FeedError::Transport(err.to_string())),
        };

        let status = response.status().as_u16();
        if status == 304 {
            return FetchOutcome::NotModified;
        }
        if FeedError::is_permanent_status(status) {
            return FetchOutcome::PermanentlyDead { status };
        }
        if !response.status().is_success() {
            return FetchOutcome::Error(FeedError::Transport(format!("unexpected status {}", status)));
        }

        let effective_url = response.url().to_string();
        let last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let headers = header_snapshot(response.headers());

        let body = match read_limited(response, request.max_bytes).await {
            Ok(body) => body,
            Err(err) => return FetchOutcome::Error(err),
        };

        FetchOutcome::Fetched {
            body,
            status,
            last_modified,
            effective_url,
            headers,
        }
    }
}

fn header_snapshot(headers: &reqwest::header::HeaderMap) -> HeaderSnapshot {
    let powered_by = headers
        .get("powered-by")
        .or_else(|| headers.get("x-powered-by"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let mut link_hub = None;
    let mut link_self = None;
    for value in headers.get_all("link").iter().filter_map(|v| v.to_str().ok()) {
        for part in value.split(',') {
            if part.contains("rel=\"hub\"") || part.contains("rel=hub") {
                link_hub = extract_link_target(part);
            }
            if part.contains("rel=\"self\"") || part.contains("rel=self") {
                link_self = extract_link_target(part);
            }
        }
    }

    HeaderSnapshot { powered_by, link_hub, link_self }
}

fn extract_link_target(part: &str) -> Option<String> {
    let start = part.find('<')?;
    let end = part[start..].find('>')? + start;
    Some(part[start + 1..end].to_string())
}

async fn read_limited(response: reqwest::Response, max_bytes: u64) -> Result<String, FeedError> {
    use futures_util::StreamExt;
    let mut stream = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| FeedError::Transport(err.to_string()))?;
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 > max_bytes {
            buf.truncate(max_bytes as usize);
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn fetch_gopher(request: &FetchRequest) -> FetchOutcome {
    let Some((_, rest)) = request.uri.split_once("://") else {
        return FetchOutcome::Error(FeedError::Transport("malformed gopher uri".into()));
    };
    let (host_port, selector) = rest.split_once('/').unwrap_or((rest, ""));
    let addr = if host_port.contains(':') {
        host_port.to_string()
    } else {
        format!("{}:70", host_port)
    };

    let connect = tokio::time::timeout(request.timeout, tokio::net::TcpStream::connect(&addr)).await;
    let mut stream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return FetchOutcome::Error(FeedError::Transport(err.to_string())),
        Err(_) => return FetchOutcome::Error(FeedError::Transport("connect timeout".into())),
    };

    if let Err(err) = stream.write_all(format!("{}\r\n", selector).as_bytes()).await {
        return FetchOutcome::Error(FeedError::Transport(err.to_string()));
    }

    match read_stream_limited(&mut stream, request.max_bytes, request.timeout).await {
        Ok(body) => FetchOutcome::Fetched {
            body,
            status: 200,
            last_modified: None,
            effective_url: request.uri.clone(),
            headers: HeaderSnapshot::default(),
        },
        Err(err) => FetchOutcome::Error(err),
    }
}

async fn fetch_gemini(request: &FetchRequest) -> FetchOutcome {
    let Some((_, rest)) = request.uri.split_once("://") else {
        return FetchOutcome::Error(FeedError::Transport("malformed gemini uri".into()));
    };
    let host = rest.split('/').next().unwrap_or(rest);
    let host_only = host.split(':').next().unwrap_or(host);
    let addr = if host.contains(':') { host.to_string() } else { format!("{}:1965", host) };

    let connect = tokio::time::timeout(request.timeout, tokio::net::TcpStream::connect(&addr)).await;
    let tcp = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return FetchOutcome::Error(FeedError::Transport(err.to_string())),
        Err(_) => return FetchOutcome::Error(FeedError::Transport("connect timeout".into())),
    };

    let connector = match native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .build()
    {
        Ok(connector) => tokio_native_tls::TlsConnector::from(connector),
        Err(err) => return FetchOutcome::Error(FeedError::Transport(err.to_string())),
    };

    let mut stream = match connector.connect(host_only, tcp).await {
        Ok(stream) => stream,
        Err(err) => return FetchOutcome::Error(FeedError::Transport(err.to_string())),
    };

    if let Err(err) = stream.write_all(format!("{}\r\n", request.uri).as_bytes()).await {
        return FetchOutcome::Error(FeedError::Transport(err.to_string()));
    }

    match read_stream_limited(&mut stream, request.max_bytes, request.timeout).await {
        Ok(raw) => {
            // Gemini responses begin with "<status> <meta>\r\n" before the body.
            let body = raw.split_once("\r\n").map(|(_, rest)| rest.to_string()).unwrap_or(raw);
            FetchOutcome::Fetched {
                body,
                status: 200,
                last_modified: None,
                effective_url: request.uri.clone(),
                headers: HeaderSnapshot::default(),
            }
        }
        Err(err) => FetchOutcome::Error(err),
    }
}

async fn read_stream_limited<S>(stream: &mut S, max_bytes: u64, timeout: Duration) -> Result<String, FeedError>
where
    S: AsyncReadExt + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = tokio::time::timeout(timeout, stream.read(&mut chunk)).await;
        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() as u64 > max_bytes {
                    buf.truncate(max_bytes as usize);
                    break;
                }
            }
            Ok(Err(err)) => return Err(FeedError::Transport(err.to_string())),
            Err(_) => return Err(FeedError::Transport("read timeout".into())),
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_dispatch_by_scheme() {
        assert_eq!(protocol_for("https://a.example/twtxt.txt"), Some(Protocol::Http));
        assert_eq!(protocol_for("gopher://a.example/1/feed"), Some(Protocol::Gopher));
        assert_eq!(protocol_for("gemini://a.example/feed.txt"), Some(Protocol::Gemini));
        assert_eq!(protocol_for("ftp://a.example/feed"), None);
    }

    #[test]
    fn link_header_target_extraction() {
        let part = r#"<https://hub.example/>; rel="hub""#;
        assert_eq!(extract_link_target(part), Some("https://hub.example/".to_string()));
    }
}
