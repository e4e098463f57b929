//! WebMention inbox/outbox (spec §4.H): inbound citation verification and
//! outbound mention delivery, each driven by a bounded channel and a
//! background processor, independent of each other.

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use tokio::sync::mpsc;

use crate::config::Config;

const INBOX_QUEUE_SIZE: usize = 100;
const OUTBOX_QUEUE_SIZE: usize = 100;
const MAX_RETRIES: u32 = 6;

#[derive(Clone, Debug)]
pub struct InboundMention {
    pub source: String,
    pub target: String,
}

#[derive(Clone, Debug)]
pub struct OutboundMention {
    pub source: String,
    pub target: String,
    pub attempt: u32,
}

pub struct WebMentionState {
    config: Arc<Config>,
    http: reqwest::Client,
    inbox_tx: mpsc::Sender<InboundMention>,
    inbox_rx: tokio::sync::Mutex<Option<mpsc::Receiver<InboundMention>>>,
    outbox_tx: mpsc::Sender<OutboundMention>,
    outbox_rx: tokio::sync::Mutex<Option<mpsc::Receiver<OutboundMention>>>,
}

impl WebMentionState {
    pub fn new(config: Arc<Config>, http: reqwest::Client) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_QUEUE_SIZE);
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_QUEUE_SIZE);
        Self {
            config,
            http,
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(Some(inbox_rx)),
            outbox_tx,
            outbox_rx: tokio::sync::Mutex::new(Some(outbox_rx)),
        }
    }

    /// `POST /webmention` handler body: enqueues without blocking the
    /// request beyond channel backpressure.
    pub async fn enqueue_inbound(&self, source: String, target: String) -> bool {
        self.inbox_tx.send(InboundMention { source, target }).await.is_ok()
    }

    pub async fn enqueue_outbound(&self, source: String, target: String) -> bool {
        self.outbox_tx.send(OutboundMention { source, target, attempt: 0 }).await.is_ok()
    }

    /// Fetches `source`, and if it actually links to `target` (directly or
    /// via the on-pod `/external?uri=` indirection), invokes `on_mention`
    /// with scraped microformat data. A source with `rel=` Link headers
    /// but no matching anchor still invokes with `data = None`; otherwise
    /// the mention is dropped.
    pub async fn run_inbox_processor(&self, on_mention: impl Fn(String, String, Option<String>) + Send + Sync + 'static) {
        let mut receiver = match self.inbox_rx.lock().await.take() {
            Some(receiver) => receiver,
            None => return,
        };
        let external_prefix = format!("{}/external?uri=", self.config.base_url.trim_end_matches('/'));

        while let Some(mention) = receiver.recv().await {
            let response = match self.http.get(&mention.source).send().await {
                Ok(response) if response.status().is_success() => response,
                _ => continue,
            };
            let has_rel_links = response.headers().get_all("link").iter().next().is_some();
            let Ok(body) = response.text().await else { continue };

            if let Some(data) = find_matching_link(&body, &mention.target, &external_prefix) {
                on_mention(mention.source, mention.target, Some(data));
            } else if has_rel_links {
                on_mention(mention.source, mention.target, None);
            }
        }
    }

    /// Discovers `target`'s endpoint (Link header, else `rel=webmention`
    /// in the body) and posts the mention; requeues on failure up to
    /// `MAX_RETRIES` times.
    pub async fn run_outbox_processor(&self) {
        let mut receiver = match self.outbox_rx.lock().await.take() {
            Some(receiver) => receiver,
            None => return,
        };
        while let Some(mention) = receiver.recv().await {
            let Some(endpoint) = self.discover_endpoint(&mention.target).await else { continue };
            let result = self
                .http
                .post(&endpoint)
                .form(&[("source", mention.source.as_str()), ("target", mention.target.as_str())])
                .send()
                .await;
            let delivered = matches!(result, Ok(response) if response.status().is_success());
            if !delivered && mention.attempt + 1 < MAX_RETRIES {
                let retry = OutboundMention { attempt: mention.attempt + 1, ..mention };
                tokio::time::sleep(backoff(retry.attempt)).await;
                let _ = self.outbox_tx.send(retry).await;
            }
        }
    }

    async fn discover_endpoint(&self, target: &str) -> Option<String> {
        let response = self.http.get(target).send().await.ok()?;
        if let Some(link) = response
            .headers()
            .get_all("link")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.contains("rel=\"webmention\"") || v.contains("rel=webmention"))
        {
            if let Some(endpoint) = extract_link_target(link) {
                return Some(resolve(target, &endpoint));
            }
        }
        let body = response.text().await.ok()?;
        let document = Html::parse_document(&body);
        let selector = Selector::parse(r#"link[rel="webmention"], a[rel="webmention"]"#).ok()?;
        document
            .select(&selector)
            .find_map(|el| el.value().attr("href"))
            .map(|href| resolve(target, href))
    }
}

fn find_matching_link(body: &str, target: &str, external_prefix: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("a[href]").ok()?;
    let external_form = format!("{}{}", external_prefix, urlencode(target));

    document.select(&selector).find_map(|el| {
        let href = el.value().attr("href")?;
        if href == target || href == external_form {
            Some(el.text().collect::<String>())
        } else {
            None
        }
    })
}

fn resolve(base: &str, maybe_relative: &str) -> String {
    match url::Url::parse(base).and_then(|base| base.join(maybe_relative)) {
        Ok(joined) => joined.to_string(),
        Err(_) => maybe_relative.to_string(),
    }
}

fn extract_link_target(part: &str) -> Option<String> {
    let start = part.find('<')?;
    let end = part[start..].find('>')? + start;
    Some(part[start + 1..end].to_string())
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(200 * 2u64.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_anchor_linking_directly_to_target() {
        let body = r#"<html><body><a href="https://pod.example/twt/abc1234">reply</a></body></html>"#;
        let found = find_matching_link(body, "https://pod.example/twt/abc1234", "https://pod.example/external?uri=");
        assert_eq!(found, Some("reply".to_string()));
    }

    #[test]
    fn finds_anchor_via_external_indirection() {
        let target = "https://pod.example/twt/abc1234";
        let external_prefix = "https://pod.example/external?uri=";
        let body = format!(r#"<a href="{}{}">reply</a>"#, external_prefix, urlencode(target));
        assert!(find_matching_link(&body, target, external_prefix).is_some());
    }

    #[test]
    fn no_matching_anchor_returns_none() {
        let body = r#"<a href="https://elsewhere.example/">not it</a>"#;
        assert!(find_matching_link(body, "https://pod.example/twt/abc1234", "https://pod.example/external?uri=").is_none());
    }
}
