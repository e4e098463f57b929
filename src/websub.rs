//! WebSub hub (inbound subscribers) and client (outbound subscriptions)
//! on the same pod (spec §4.G). Subscriber state is persisted; in-flight
//! subscriptions the pod itself holds as a client are memory-only, as the
//! spec specifies.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::config::Config;

const DEFAULT_LEASE: Duration = Duration::hours(1);
const PENDING_TIMEOUT: Duration = Duration::minutes(5);
const MAX_RETRIES: u32 = 6;
const NOTIFY_QUEUE_SIZE: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriberState {
    Unverified,
    Verified,
    Expired,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscriber {
    pub topic: String,
    pub callback: String,
    pub state: SubscriberState,
    pub challenge: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Confirmed,
    Dropped,
    Expired,
}

#[derive(Clone, Debug)]
pub struct Subscription {
    pub topic: String,
    pub hub: String,
    pub callback: String,
    pub state: SubscriptionState,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedSubscribers {
    subscribers: HashMap<String, Vec<Subscriber>>,
}

pub struct WebSubState {
    config: Arc<Config>,
    http: reqwest::Client,
    subscribers: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    notify_tx: mpsc::Sender<String>,
    notify_rx: RwLock<Option<mpsc::Receiver<String>>>,
}

impl WebSubState {
    pub fn new(config: Arc<Config>, http: reqwest::Client) -> Self {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE_SIZE);
        Self {
            config,
            http,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: RwLock::new(HashMap::new()),
            notify_tx,
            notify_rx: RwLock::new(Some(notify_rx)),
        }
    }

    fn validate_topic(&self, topic: &str) -> bool {
        url::Url::parse(topic).is_ok()
    }

    /// `POST /websub` handler body.
    pub async fn handle_hub_request(&self, mode: &str, topic: &str, callback: &str) -> Result<(), &'static str> {
        if url::Url::parse(callback).is_err() || !self.validate_topic(topic) {
            return Err("invalid topic or callback");
        }
        match mode {
            "subscribe" => {
                let challenge: String = rand::thread_rng().sample_iter(rand::distributions::Alphanumeric).take(24).map(char::from).collect();
                let subscriber = Subscriber {
                    topic: topic.to_string(),
                    callback: callback.to_string(),
                    state: SubscriberState::Unverified,
                    challenge: challenge.clone(),
                    expires_at: None,
                };
                self.subscribers.write().await.entry(topic.to_string()).or_default().push(subscriber);
                self.spawn_verify(topic.to_string(), callback.to_string(), challenge);
                Ok(())
            }
            "unsubscribe" => {
                let mut subscribers = self.subscribers.write().await;
                if let Some(list) = subscribers.get_mut(topic) {
                    list.retain(|s| s.callback != callback);
                }
                Ok(())
            }
            _ => Err("unknown hub.mode"),
        }
    }

    fn spawn_verify(&self, topic: String, callback: String, challenge: String) {
        let http = self.http.clone();
        let subscribers = self.subscribers.clone();
        tokio::spawn(async move {
            for attempt in 0..MAX_RETRIES {
                let url = format!(
                    "{}?hub.mode=subscribe&hub.topic={}&hub.challenge={}&hub.lease_seconds={}",
                    callback,
                    urlencode(&topic),
                    challenge,
                    DEFAULT_LEASE.num_seconds()
                );
                if let Ok(response) = http.get(&url).send().await {
                    if response.status().is_success() {
                        if let Ok(body) = response.text().await {
                            if body.trim() == challenge {
                                mark_verified(&subscribers, &topic, &callback).await;
                                return;
                            }
                        }
                    }
                }
                tokio::time::sleep(backoff(attempt)).await;
            }
        });
    }

    /// `GET /notify` confirmation handler: responds with the challenge iff
    /// a matching pending subscription exists.
    pub async fn handle_confirmation(&self, mode: &str, topic_hint: Option<&str>, challenge: &str, lease_seconds: Option<u64>) -> Option<String> {
        if mode != "subscribe" {
            return None;
        }
        let mut subscriptions = self.subscriptions.write().await;
        let pending = subscriptions.values_mut().find(|s| {
            s.state == SubscriptionState::Pending && topic_hint.map(|t| t == s.topic).unwrap_or(true)
        })?;
        let lease = lease_seconds.map(|s| Duration::seconds(s as i64)).unwrap_or(DEFAULT_LEASE);
        pending.state = SubscriptionState::Confirmed;
        pending.expires_at = Some(Utc::now() + lease);
        Some(challenge.to_string())
    }

    /// `POST /notify` handler: enqueues the topic; a background processor
    /// calls the caller-supplied `Notify(topic)` equivalent.
    pub async fn enqueue_notification(&self, topic: String) {
        let _ = self.notify_tx.send(topic).await;
    }

    /// Drains queued notifications, invoking `on_notify` for each. Meant
    /// to be driven as a long-lived background task.
    pub async fn run_notify_processor(&self, on_notify: impl Fn(String) + Send + Sync + 'static) {
        let mut receiver = match self.notify_rx.write().await.take() {
            Some(receiver) => receiver,
            None => return,
        };
        while let Some(topic) = receiver.recv().await {
            on_notify(topic);
        }
    }

    /// As a subscriber: discovers the hub via `Link` headers on `topic`
    /// and registers a pending subscription.
    pub async fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
        let response = self.http.get(topic).send().await?;
        let hub = response
            .headers()
            .get_all("link")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.contains("rel=\"hub\"") || v.contains("rel=hub"))
            .and_then(extract_link_target)
            .ok_or_else(|| anyhow::anyhow!("no hub link advertised by {}", topic))?;

        let callback = format!("{}/notify", self.config.base_url.trim_end_matches('/'));
        self.subscriptions.write().await.insert(
            topic.to_string(),
            Subscription {
                topic: topic.to_string(),
                hub: hub.clone(),
                callback: callback.clone(),
                state: SubscriptionState::Pending,
                expires_at: None,
                created_at: Utc::now(),
            },
        );

        self.http
            .post(&hub)
            .form(&[("hub.mode", "subscribe"), ("hub.topic", topic), ("hub.callback", &callback)])
            .send()
            .await?;
        Ok(())
    }

    /// Drops subscriptions still `Pending` after five minutes and expires
    /// confirmed ones past their lease. Meant for a ticker-driven cleanup
    /// task, same shape as the dispatcher janitor.
    pub async fn run_cleanup_once(&self) {
        let now = Utc::now();
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|_, sub| {
            if sub.state == SubscriptionState::Pending && now - sub.created_at > PENDING_TIMEOUT {
                return false;
            }
            if let Some(expires_at) = sub.expires_at {
                if now > expires_at {
                    sub.state = SubscriptionState::Expired;
                }
            }
            true
        });

        let mut subscribers = self.subscribers.write().await;
        for list in subscribers.values_mut() {
            for subscriber in list.iter_mut() {
                if let Some(expires_at) = subscriber.expires_at {
                    if now > expires_at {
                        subscriber.state = SubscriberState::Expired;
                    }
                }
            }
        }
    }

    /// Notifies every verified subscriber of `topic` that new content is
    /// available, retrying failed deliveries up to `MAX_RETRIES` times.
    pub async fn notify_subscribers(&self, topic: &str) {
        let callbacks: Vec<String> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .get(topic)
                .map(|list| list.iter().filter(|s| s.state == SubscriberState::Verified).map(|s| s.callback.clone()).collect())
                .unwrap_or_default()
        };

        for callback in callbacks {
            let http = self.http.clone();
            let topic = topic.to_string();
            let hub_url = format!("{}/websub", self.config.base_url.trim_end_matches('/'));
            tokio::spawn(async move {
                for attempt in 0..MAX_RETRIES {
                    let result = http
                        .post(&callback)
                        .header("Link", format!("<{}>; rel=\"hub\", <{}>; rel=\"self\"", hub_url, topic))
                        .body(topic.clone())
                        .send()
                        .await;
                    if matches!(result, Ok(response) if response.status().is_success()) {
                        return;
                    }
                    tokio::time::sleep(backoff(attempt)).await;
                }
            });
        }
    }

    pub async fn store(&self, path: &PathBuf) -> anyhow::Result<()> {
        let subscribers = self.subscribers.read().await.clone();
        let persisted = PersistedSubscribers { subscribers };
        let bytes = serde_json::to_vec(&persisted)?;
        let tmp = path.with_extension("tmp");
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub async fn load(&self, path: &PathBuf) {
        let Ok(bytes) = std::fs::read(path) else { return };
        if let Ok(persisted) = serde_json::from_slice::<PersistedSubscribers>(&bytes) {
            *self.subscribers.write().await = persisted.subscribers;
        }
    }
}

async fn mark_verified(subscribers: &RwLock<HashMap<String, Vec<Subscriber>>>, topic: &str, callback: &str) {
    let mut subscribers = subscribers.write().await;
    if let Some(list) = subscribers.get_mut(topic) {
        if let Some(subscriber) = list.iter_mut().find(|s| s.callback == callback) {
            subscriber.state = SubscriberState::Verified;
            subscriber.expires_at = Some(Utc::now() + DEFAULT_LEASE);
        }
    }
}

fn backoff(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_millis(200 * 2u64.saturating_pow(attempt))
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn extract_link_target(part: &str) -> Option<String> {
    let start = part.find('<')?;
    let end = part[start..].find('>')? + start;
    Some(part[start + 1..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Arc<Config> {
        Arc::new(Config::for_tests("https://pod.example"))
    }

    #[tokio::test]
    async fn hub_subscribe_rejects_bad_topic() {
        let state = WebSubState::new(config(), reqwest::Client::new());
        let result = state.handle_hub_request("subscribe", "not a url", "https://sub.example/notify").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn hub_unsubscribe_removes_subscriber() {
        let state = WebSubState::new(config(), reqwest::Client::new());
        state.subscribers.write().await.entry("https://a.example/twtxt.txt".into()).or_default().push(Subscriber {
            topic: "https://a.example/twtxt.txt".into(),
            callback: "https://sub.example/notify".into(),
            state: SubscriberState::Verified,
            challenge: "abc".into(),
            expires_at: None,
        });
        state.handle_hub_request("unsubscribe", "https://a.example/twtxt.txt", "https://sub.example/notify").await.unwrap();
        assert!(state.subscribers.read().await.get("https://a.example/twtxt.txt").unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirmation_matches_pending_subscription() {
        let state = WebSubState::new(config(), reqwest::Client::new());
        state.subscriptions.write().await.insert(
            "https://a.example/twtxt.txt".into(),
            Subscription {
                topic: "https://a.example/twtxt.txt".into(),
                hub: "https://hub.example".into(),
                callback: "https://pod.example/notify".into(),
                state: SubscriptionState::Pending,
                expires_at: None,
                created_at: Utc::now(),
            },
        );
        let response = state.handle_confirmation("subscribe", Some("https://a.example/twtxt.txt"), "chal123", Some(3600)).await;
        assert_eq!(response, Some("chal123".to_string()));
    }
}
