//! Inter-Pod Push (spec §4.F): a lightweight peer-to-peer publish/
//! subscribe protocol layered directly on HTTP headers rather than a
//! request body.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::Config;
use crate::dispatcher::Dispatcher;

pub const IPP_SUB_HEADER: &str = "x-ipp-callback";
pub const IPP_PUB_HEADER: &str = "x-ipp-uri";
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct IppState {
    config: Arc<Config>,
    http: reqwest::Client,
    /// Callback URLs of peers we must notify when a local user posts.
    subscribers: RwLock<HashSet<String>>,
    /// Peer base URL → usernames locally interested in it, for reference
    /// counting subscribe/unsubscribe calls we make as a client.
    subscriptions: RwLock<HashMap<String, HashSet<String>>>,
}

impl IppState {
    pub fn new(config: Arc<Config>, http: reqwest::Client) -> Self {
        Self { config, http, subscribers: RwLock::new(HashSet::new()), subscriptions: RwLock::new(HashMap::new()) }
    }

    /// `POST /ipp/sub` handler body: records the caller as a subscriber.
    pub async fn record_subscriber(&self, callback: Option<&str>) -> bool {
        let Some(callback) = callback.filter(|c| !c.is_empty() && url::Url::parse(c).is_ok()) else {
            return false;
        };
        self.subscribers.write().await.insert(callback.to_string());
        true
    }

    /// `POST /ipp/pub` handler body: returns whether we're subscribed to
    /// any peer whose base URI prefixes `uri` (spec §9 open question —
    /// implemented exactly as observed, acknowledged as fragile coupling).
    pub async fn is_interested_in(&self, uri: &str) -> bool {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.keys().any(|peer_base| uri.starts_with(peer_base.as_str()))
    }

    /// Reference-counted subscribe: only actually calls the peer's
    /// `/ipp/sub` the first time any local user follows a feed there.
    pub async fn subscribe_user(&self, peer_base: &str, username: &str) {
        let should_subscribe = {
            let mut subscriptions = self.subscriptions.write().await;
            let entry = subscriptions.entry(peer_base.to_string()).or_default();
            let was_empty = entry.is_empty();
            entry.insert(username.to_string());
            was_empty
        };
        if should_subscribe {
            let callback = format!("{}/ipp/pub", self.config.base_url.trim_end_matches('/'));
            let _ = self
                .http
                .post(format!("{}/ipp/sub", peer_base.trim_end_matches('/')))
                .header(IPP_SUB_HEADER, callback)
                .timeout(PUBLISH_TIMEOUT)
                .send()
                .await;
        }
    }

    /// Reference-counted unsubscribe: only calls the peer when the last
    /// interested local user unfollows.
    pub async fn unsubscribe_user(&self, peer_base: &str, username: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(entry) = subscriptions.get_mut(peer_base) {
            entry.remove(username);
            if entry.is_empty() {
                subscriptions.remove(peer_base);
            }
        }
    }

    /// Called when a local user posts: enqueues one notification per
    /// subscriber via the dispatcher. A subscriber that doesn't answer
    /// `202` is dropped (spec: "the publisher will read anything != 202
    /// as unsubscribe me").
    pub async fn publish(&self, dispatcher: &Dispatcher, feed_uri: &str) {
        if !self.config.features.ipp {
            return;
        }
        let subscribers: Vec<String> = self.subscribers.read().await.iter().cloned().collect();
        for callback in subscribers {
            let http = self.http.clone();
            let feed_uri = feed_uri.to_string();
            let callback_for_job = callback.clone();
            let job: crate::dispatcher::Job = Box::new(move || {
                Box::pin(async move {
                    let response = http
                        .post(&callback_for_job)
                        .header(IPP_PUB_HEADER, &feed_uri)
                        .timeout(PUBLISH_TIMEOUT)
                        .send()
                        .await?;
                    Ok(serde_json::json!({ "status": response.status().as_u16() }))
                })
            });
            if let Ok(id) = dispatcher.dispatch(job).await {
                if let Some(record) = wait_briefly_for(dispatcher, id).await {
                    let status = record.result.and_then(|v| v.get("status").and_then(|s| s.as_u64()));
                    if status != Some(202) {
                        self.subscribers.write().await.remove(&callback);
                    }
                }
            }
        }
    }
}

async fn wait_briefly_for(dispatcher: &Dispatcher, id: uuid::Uuid) -> Option<crate::dispatcher::TaskRecord> {
    use crate::dispatcher::TaskState;
    for _ in 0..20 {
        if let Some(record) = dispatcher.lookup(id).await {
            if matches!(record.state, TaskState::Complete | TaskState::Failed) {
                return Some(record);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Arc<Config> {
        Arc::new(Config::for_tests("https://pod.example"))
    }

    #[tokio::test]
    async fn record_subscriber_rejects_bad_callback() {
        let state = IppState::new(config(), reqwest::Client::new());
        assert!(!state.record_subscriber(None).await);
        assert!(!state.record_subscriber(Some("not a url")).await);
        assert!(state.record_subscriber(Some("https://peer.example/ipp/pub")).await);
    }

    #[tokio::test]
    async fn is_interested_matches_by_prefix() {
        let state = IppState::new(config(), reqwest::Client::new());
        state.subscribe_user("https://peer.example", "alice").await;
        assert!(state.is_interested_in("https://peer.example/user/bob/twtxt.txt").await);
        assert!(!state.is_interested_in("https://other.example/twtxt.txt").await);
    }

    #[tokio::test]
    async fn subscribe_is_reference_counted() {
        let state = IppState::new(config(), reqwest::Client::new());
        state.subscribe_user("https://peer.example", "alice").await;
        state.subscribe_user("https://peer.example", "bob").await;
        state.unsubscribe_user("https://peer.example", "alice").await;
        assert!(state.is_interested_in("https://peer.example/twtxt.txt").await);
        state.unsubscribe_user("https://peer.example", "bob").await;
        assert!(!state.is_interested_in("https://peer.example/twtxt.txt").await);
    }
}
