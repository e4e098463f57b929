//! The Feed Cache (spec §4.E) — the hardest component: a multiply-indexed
//! concurrent structure behind one read-write lock. Mirrors the shared-
//! resource policy in spec §5 ("One rw-mutex on the cache struct; anything
//! holding the write lock may mutate").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};

use crate::archive::Archive;
use crate::config::{Config, PatternList};
use crate::fetcher::{FetchOutcome, FetchRequest, Fetcher};
use crate::feed::model::{Element, Post, Twter};
use crate::feed::moving_average;
use crate::feed::parser::{looks_like_feed, parse_feed};
use crate::feed::view;

pub const CACHE_SCHEMA_VERSION: u32 = 1;
const PEER_STALE_AFTER: Duration = Duration::hours(24);
const PEER_EVICT_LAST_SEEN: Duration = Duration::hours(12);
const PEER_EVICT_LAST_UPDATED: Duration = Duration::hours(24);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedFeed {
    pub uri: String,
    pub twter: Twter,
    /// Newest-first, duplicate-free by hash (spec §3 invariant).
    pub posts: Vec<Post>,
    pub last_modified: Option<String>,
    pub last_fetched: Option<DateTime<Utc>>,
    pub errors: u64,
    pub last_error: Option<String>,
    pub moving_average: Option<Duration>,
    pub dead: bool,
    pub dead_status: Option<u16>,
    pub refresh_hint_secs: Option<u64>,
    pub shadowed: bool,
    pub automated: bool,
}

impl CachedFeed {
    pub fn new(uri: impl Into<String>, twter: Twter) -> Self {
        Self {
            uri: uri.into(),
            twter,
            posts: Vec::new(),
            last_modified: None,
            last_fetched: None,
            errors: 0,
            last_error: None,
            moving_average: None,
            dead: false,
            dead_status: None,
            refresh_hint_secs: None,
            shadowed: false,
            automated: false,
        }
    }

    /// Replaces the post window after a successful fetch. Returns posts
    /// pushed out of the `max_items`/`max_ttl` window so the caller can
    /// archive them before they're lost (spec: "at which point it must
    /// already be in the archive or it is lost").
    fn replace_posts(&mut self, mut fetched: Vec<Post>, max_items: usize, max_ttl: Duration) -> Vec<Post> {
        fetched.sort_by(|a, b| b.created.cmp(&a.created));
        let mut seen = std::collections::HashSet::new();
        fetched.retain(|post| seen.insert(post.hash.clone()));

        let now = Utc::now();
        let cutoff = now - max_ttl;
        let kept: Vec<Post> = fetched
            .iter()
            .take(max_items)
            .filter(|post| post.created.with_timezone(&Utc) >= cutoff)
            .cloned()
            .collect();
        let kept_hashes: std::collections::HashSet<_> = kept.iter().map(|p| p.hash.clone()).collect();
        let evicted: Vec<Post> = fetched.into_iter().filter(|p| !kept_hashes.contains(&p.hash)).collect();

        self.posts = kept;
        evicted
    }

    fn insert_one(&mut self, post: Post) -> bool {
        if self.posts.iter().any(|p| p.hash == post.hash) {
            return false;
        }
        let idx = self.posts.partition_point(|existing| existing.created > post.created);
        self.posts.insert(idx, post);
        true
    }

    fn remove_one(&mut self, hash: &str) -> Option<Post> {
        let idx = self.posts.iter().position(|p| p.hash == hash)?;
        Some(self.posts.remove(idx))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    pub base_url: String,
    pub name: String,
    pub description: String,
    pub software_version: String,
    pub last_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Peer {
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.last_updated > PEER_STALE_AFTER
    }

    pub fn should_evict(&self) -> bool {
        let now = Utc::now();
        now - self.last_seen > PEER_EVICT_LAST_SEEN && now - self.last_updated > PEER_EVICT_LAST_UPDATED
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Follower {
    pub twter: Twter,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    peers: HashMap<String, Peer>,
    feeds: HashMap<String, CachedFeed>,
    followers: HashMap<String, Vec<Follower>>,
    twters: HashMap<String, Twter>,
}

struct Inner {
    list: Vec<Post>,
    map: HashMap<String, Post>,
    feeds: HashMap<String, CachedFeed>,
    views: HashMap<String, Vec<Post>>,
    peers: HashMap<String, Peer>,
    followers: HashMap<String, Vec<Follower>>,
    twters: HashMap<String, Twter>,
}

pub struct FeedCache {
    inner: RwLock<Inner>,
    config: Arc<Config>,
}

pub struct FetchRequestSpec {
    pub uri: String,
    pub force: bool,
}

impl FeedCache {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                list: Vec::new(),
                map: HashMap::new(),
                feeds: HashMap::new(),
                views: HashMap::new(),
                peers: HashMap::new(),
                followers: HashMap::new(),
                twters: HashMap::new(),
            }),
            config,
        }
    }

    pub async fn lookup(&self, hash: &str) -> Option<Post> {
        self.inner.read().await.map.get(hash).cloned()
    }

    pub async fn view(&self, name: &str) -> Vec<Post> {
        self.inner.read().await.views.get(name).cloned().unwrap_or_default()
    }

    pub async fn get_feed(&self, uri: &str) -> Option<CachedFeed> {
        self.inner.read().await.feeds.get(uri).cloned()
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.read().await.peers.len()
    }

    /// All feed URIs currently tracked, for building a refresh tick's
    /// request batch.
    pub async fn known_feed_uris(&self) -> Vec<String> {
        self.inner.read().await.feeds.keys().cloned().collect()
    }

    pub async fn public_followers(&self) -> HashMap<String, Vec<Twter>> {
        let inner = self.inner.read().await;
        inner
            .followers
            .iter()
            .map(|(nick, followers)| (nick.clone(), followers.iter().map(|f| f.twter.clone()).collect()))
            .collect()
    }

    /// Idempotent insert; does nothing if the hash is already known.
    pub async fn inject_feed(&self, uri: &str, post: Post) -> bool {
        let mut inner = self.inner.write().await;
        if inner.map.contains_key(&post.hash) {
            return false;
        }
        inner.twters.insert(post.twter.uri.clone(), post.twter.clone());
        let feed = inner.feeds.entry(uri.to_string()).or_insert_with(|| CachedFeed::new(uri, post.twter.clone()));
        feed.insert_one(post.clone());

        inner.map.insert(post.hash.clone(), post.clone());
        let idx = inner.list.partition_point(|existing| existing.created > post.created);
        inner.list.insert(idx, post.clone());

        for (name, views_post) in views_touched_by(&post) {
            inner.views.entry(name).or_default().insert(0, views_post);
        }
        true
    }

    pub async fn snipe_feed(&self, uri: &str, hash: &str) -> Option<Post> {
        let mut inner = self.inner.write().await;
        let removed = inner.feeds.get_mut(uri).and_then(|feed| feed.remove_one(hash));
        if removed.is_some() {
            inner.map.remove(hash);
            inner.list.retain(|p| p.hash != hash);
        }
        removed
    }

    /// Rebuilds `list`, `map`, and all standard views from `feeds`.
    pub async fn refresh(&self) {
        let mut inner = self.inner.write().await;
        let mut list: Vec<Post> = inner.feeds.values().flat_map(|f| f.posts.iter().cloned()).collect();
        list.sort_by(|a, b| b.created.cmp(&a.created));
        let mut seen = std::collections::HashSet::new();
        list.retain(|p| seen.insert(p.hash.clone()));

        let map = list.iter().map(|p| (p.hash.clone(), p.clone())).collect();
        let views = view::materialize(&inner.feeds, &self.config.base_url);

        inner.list = list;
        inner.map = map;
        inner.views = views;
    }

    pub async fn prune_followers(&self, older_than: Duration) {
        let cutoff = Utc::now() - older_than;
        let mut inner = self.inner.write().await;
        for followers in inner.followers.values_mut() {
            followers.retain(|f| f.last_seen_at >= cutoff);
        }
    }

    /// Parses the incoming `User-Agent` on a feed fetch; records the peer
    /// if it identifies another pod, and merges any advertised follower
    /// tuples regardless.
    pub async fn detect_client_from_request(&self, user_agent: &str, profile_nick: &str) {
        let Some((peer_base, twter)) = parse_client_user_agent(user_agent) else { return };
        let mut inner = self.inner.write().await;
        upsert_peer_seen(&mut inner.peers, &peer_base);
        if let Some(twter) = twter {
            let entry = inner.followers.entry(profile_nick.to_string()).or_default();
            if let Some(existing) = entry.iter_mut().find(|f| f.twter == twter) {
                existing.last_seen_at = Utc::now();
            } else {
                entry.push(Follower { twter, last_seen_at: Utc::now() });
            }
        }
    }

    /// Records a peer and, if WebSub is on and both `rel=hub`/`rel=self`
    /// are present and we're not already subscribed, returns the hub URL
    /// so the caller can kick off a subscribe.
    pub async fn detect_client_from_response(
        &self,
        headers: &crate::fetcher::HeaderSnapshot,
        already_subscribed: bool,
    ) -> Option<String> {
        if let Some(powered_by) = &headers.powered_by {
            if let Some(base) = powered_by.split_whitespace().last() {
                let mut inner = self.inner.write().await;
                upsert_peer_seen(&mut inner.peers, base.trim_start_matches('(').trim_end_matches(')'));
            }
        }
        if !self.config.features.websub || already_subscribed {
            return None;
        }
        match (&headers.link_hub, &headers.link_self) {
            (Some(hub), Some(_)) => Some(hub.clone()),
            _ => None,
        }
    }

    pub async fn evict_stale_peers(&self) {
        let mut inner = self.inner.write().await;
        inner.peers.retain(|_, peer| !peer.should_evict());
    }

    /// For every known subject view whose root is neither cached nor
    /// archived, asks a candidate peer set for the root post and injects
    /// the first success.
    pub async fn converge(&self, archive: &Archive, client: &reqwest::Client) {
        let candidates = {
            let inner = self.inner.read().await;
            let mut missing = Vec::new();
            for (name, posts) in inner.views.iter() {
                let Some(hash) = name.strip_prefix("subject:(#").and_then(|s| s.strip_suffix(')')) else { continue };
                if inner.map.contains_key(hash) || archive.has(hash) {
                    continue;
                }
                let contributing: Vec<String> = posts.iter().map(|p| base_of(&p.twter.uri)).collect();
                let pool: Vec<String> = if !contributing.is_empty() {
                    contributing
                } else {
                    let mut rng = rand::thread_rng();
                    let mut all: Vec<String> = inner.peers.keys().cloned().collect();
                    all.shuffle(&mut rng);
                    let take = (all.len() * 6 / 10).max(1.min(all.len()));
                    all.into_iter().take(take).collect()
                };
                missing.push((hash.to_string(), pool));
            }
            missing
        };

        for (hash, peers) in candidates {
            for peer in peers {
                let url = format!("{}/twt/{}", peer.trim_end_matches('/'), hash);
                let response = match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => response,
                    _ => continue,
                };
                let Ok(post) = response.json::<Post>().await else { continue };
                let feed_uri = post.twter.uri.clone();
                self.inject_feed(&feed_uri, post).await;
                self.refresh().await;
                break;
            }
        }
    }

    /// Drives one wave of fetches, bounded to `MaxCacheFetchers` in
    /// parallel. Calls `refresh` once every fetch has completed.
    pub async fn fetch_feeds(
        &self,
        fetcher: &dyn Fetcher,
        requests: Vec<FetchRequestSpec>,
        public_followers: &HashMap<String, Vec<Twter>>,
        archive: &Archive,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_cache_fetchers));
        let mut handles = Vec::new();

        for request in requests {
            if self.config.blocked_feeds.matches(&request.uri) {
                continue;
            }
            let should_refresh = self.should_refresh(&request).await;
            if !should_refresh {
                continue;
            }

            let permit = semaphore.clone().acquire_owned().await.ok();
            let user_agent = build_user_agent(&self.config.version, &self.config.base_url, &public_followers_for(&request.uri, public_followers));
            let last_modified = self.inner.read().await.feeds.get(&request.uri).and_then(|f| f.last_modified.clone());
            let max_bytes = *self.config.max_fetch_limit.as_ref();
            let timeout = self.config.fetch_client_timeout.as_ref().to_std().unwrap_or(std::time::Duration::from_secs(30));

            let fetch_request = FetchRequest { uri: request.uri.clone(), if_modified_since: last_modified, user_agent, max_bytes, timeout };
            let outcome = fetcher.fetch(&fetch_request).await;
            drop(permit);
            handles.push((request.uri, outcome));
        }

        for (uri, outcome) in handles {
            self.apply_fetch_outcome(&uri, outcome, archive).await;
        }

        self.refresh().await;
    }

    async fn should_refresh(&self, request: &FetchRequestSpec) -> bool {
        if request.force {
            return true;
        }
        let host_forced = self.config.forced_refresh_hosts.iter().any(|h| request.uri.contains(h));
        if host_forced || request.uri.starts_with(&self.config.base_url) {
            return true;
        }

        let inner = self.inner.read().await;
        let Some(feed) = inner.feeds.get(&request.uri) else { return true };
        if feed.dead {
            return false;
        }
        let Some(last_fetched) = feed.last_fetched else { return true };
        let elapsed = Utc::now() - last_fetched;

        if let Some(hint_secs) = feed.refresh_hint_secs {
            if elapsed > Duration::seconds(hint_secs as i64) {
                return true;
            }
        }
        if self.config.features.moving_average_feed_refresh {
            if let Some(ma) = feed.moving_average {
                return elapsed > moving_average::clamp(ma);
            }
        }
        elapsed > self.config.fetch_interval.as_ref().clone()
    }

    async fn apply_fetch_outcome(&self, uri: &str, outcome: FetchOutcome, archive: &Archive) {
        let mut inner = self.inner.write().await;
        let twter = inner.feeds.get(uri).map(|f| f.twter.clone()).unwrap_or_else(|| Twter::new("", uri));
        let feed = inner.feeds.entry(uri.to_string()).or_insert_with(|| CachedFeed::new(uri, twter.clone()));

        match outcome {
            FetchOutcome::NotModified => {
                feed.last_fetched = Some(Utc::now());
            }
            FetchOutcome::PermanentlyDead { status } => {
                feed.dead = true;
                feed.dead_status = Some(status);
                feed.errors += 1;
                feed.last_error = Some(format!("permanent status {}", status));
            }
            FetchOutcome::Error(err) => {
                feed.errors += 1;
                feed.last_error = Some(err.to_string());
            }
            FetchOutcome::Fetched { body, last_modified, effective_url, .. } => {
                if !looks_like_feed(&body) {
                    feed.errors += 1;
                    feed.last_error = Some("does not resemble a feed".to_string());
                    return;
                }

                let fallback_twter = feed.twter.clone();
                let parsed = match parse_feed(uri, &body, &fallback_twter) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        feed.errors += 1;
                        feed.last_error = Some(err.to_string());
                        return;
                    }
                };

                let now = Utc::now();
                let (future_posts, mut present_posts): (Vec<_>, Vec<_>) =
                    parsed.posts.into_iter().partition(|p| p.created.with_timezone(&Utc) > now);
                if !future_posts.is_empty() {
                    tracing::warn!(count = future_posts.len(), feed = uri, "diverted future-dated posts");
                }
                for post in present_posts.iter_mut() {
                    sanitize_media(&mut post.elements, &self.config.permitted_images);
                }

                let timestamps: Vec<_> = present_posts.iter().map(|p| p.created).collect();
                if let Some(avg) = moving_average::average_delta(&timestamps) {
                    feed.moving_average = Some(moving_average::fold(feed.moving_average, avg));
                }

                if let Some(nick) = parsed.header.first("nick") {
                    feed.twter.nick = nick.to_string();
                }
                feed.refresh_hint_secs = parsed.header.refresh_hint_seconds();

                let evicted = feed.replace_posts(present_posts, *self.config.max_cache_items.as_ref(), self.config.max_cache_ttl.as_ref().clone());
                for post in feed.posts.iter().chain(evicted.iter()) {
                    let _ = archive.archive(post);
                }

                feed.last_modified = last_modified;
                feed.last_fetched = Some(now);

                if effective_url != uri {
                    let moved = inner.feeds.remove(uri);
                    if let Some(moved) = moved {
                        inner.feeds.insert(effective_url, moved);
                    }
                }
            }
        }
    }

    pub async fn store(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let inner = self.inner.read().await;
        let persisted = PersistedCache {
            version: CACHE_SCHEMA_VERSION,
            peers: inner.peers.clone(),
            feeds: inner.feeds.clone(),
            followers: inner.followers.clone(),
            twters: inner.twters.clone(),
        };
        let bytes = serde_json::to_vec(&persisted)?;
        let tmp = path.with_extension("tmp");
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// On schema mismatch or corruption, deletes the file and starts
    /// fresh rather than crashing (spec §7 "Persistence corruption").
    pub async fn load(&self, path: &std::path::Path) {
        let Ok(bytes) = std::fs::read(path) else { return };
        let persisted: Option<PersistedCache> = serde_json::from_slice(&bytes).ok();
        match persisted {
            Some(persisted) if persisted.version == CACHE_SCHEMA_VERSION => {
                let mut inner = self.inner.write().await;
                inner.peers = persisted.peers;
                inner.feeds = persisted.feeds;
                inner.followers = persisted.followers;
                inner.twters = persisted.twters;
                drop(inner);
                self.refresh().await;
            }
            _ => {
                tracing::warn!(?path, "persisted cache unreadable or schema mismatch, starting fresh");
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// `PermittedImages` (spec §6: "controls inline image acceptance"): any
/// `Media` element whose target doesn't match one of the configured
/// patterns is downgraded to a plain `Link`, so an untrusted feed can't
/// force an image fetch from an arbitrary host just by mentioning one.
fn sanitize_media(elements: &mut [Element], permitted_images: &PatternList) {
    if permitted_images.0.is_empty() {
        return;
    }
    for element in elements.iter_mut() {
        if let Element::Media { text, target, title } = element {
            if !permitted_images.matches(target) {
                *element = Element::Link { text: text.clone(), target: target.clone(), title: title.clone() };
            }
        }
    }
}

fn views_touched_by(post: &Post) -> Vec<(String, Post)> {
    let mut touched = vec![(view::subject_view_name(&post.subject_hash()), post.clone())];
    for tag in post.tags() {
        touched.push((view::tag_view_name(tag), post.clone()));
    }
    for (nick, _) in post.mentions() {
        touched.push((view::mentions_view_name(nick), post.clone()));
    }
    touched
}

fn base_of(uri: &str) -> String {
    uri.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .map(|host| format!("{}://{}", uri.split("://").next().unwrap_or("https"), host))
        .unwrap_or_else(|| uri.to_string())
}

fn upsert_peer_seen(peers: &mut HashMap<String, Peer>, base_url: &str) {
    let now = Utc::now();
    let entry = peers.entry(base_url.to_string()).or_insert_with(|| Peer {
        base_url: base_url.to_string(),
        name: String::new(),
        description: String::new(),
        software_version: String::new(),
        last_seen: now,
        last_updated: now,
    });
    entry.last_seen = now;
}

/// Parses a `yarnd/<ver> (+<profile-url>; @<nick>)`-shaped User-Agent
/// into a peer base URL and, when present, the announcing Twter.
fn parse_client_user_agent(user_agent: &str) -> Option<(String, Option<Twter>)> {
    let start = user_agent.find('(')?;
    let end = user_agent.find(')')?;
    let inner = &user_agent[start + 1..end];
    let profile_part = inner.split(';').next()?.trim().trim_start_matches('+');
    let base = base_of(profile_part);
    let nick = inner.split('@').nth(1).map(|s| s.trim().to_string());
    let twter = nick.map(|nick| Twter::new(nick, profile_part));
    Some((base, twter))
}

fn build_user_agent(version: &str, base_url: &str, followers: &[Twter]) -> String {
    match followers.len() {
        0 => format!("yarnd/{} (+{})", version, base_url),
        1 => format!("yarnd/{} (+{}; @{})", version, followers[0].uri, followers[0].nick),
        _ => format!("yarnd/{} (~{}/following; contact={}/support)", version, base_url, base_url),
    }
}

fn public_followers_for(uri: &str, public_followers: &HashMap<String, Vec<Twter>>) -> Vec<Twter> {
    public_followers.get(uri).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::model::Element;

    fn config() -> Arc<Config> {
        Arc::new(Config::for_tests("https://pod.example"))
    }

    fn post(uri: &str, raw: &str) -> Post {
        let twter = Twter::new("x", uri);
        let created = DateTime::parse_from_rfc3339("2016-02-03T23:05:00Z").unwrap();
        Post::new(twter, created, vec![Element::Text(raw.into())], raw.into())
    }

    #[tokio::test]
    async fn lookup_returns_what_inject_feed_inserted() {
        let cache = FeedCache::new(config());
        let p = post("https://a.example/twtxt.txt", "hello");
        assert!(cache.inject_feed("https://a.example/twtxt.txt", p.clone()).await);
        assert_eq!(cache.lookup(&p.hash).await, Some(p));
    }

    #[tokio::test]
    async fn inject_then_snipe_returns_to_empty_state() {
        let cache = FeedCache::new(config());
        let p = post("https://a.example/twtxt.txt", "hello");
        cache.inject_feed("https://a.example/twtxt.txt", p.clone()).await;
        cache.snipe_feed("https://a.example/twtxt.txt", &p.hash).await;
        assert_eq!(cache.lookup(&p.hash).await, None);
    }

    #[tokio::test]
    async fn inject_feed_is_idempotent_on_duplicate_hash() {
        let cache = FeedCache::new(config());
        let p = post("https://a.example/twtxt.txt", "hello");
        assert!(cache.inject_feed("https://a.example/twtxt.txt", p.clone()).await);
        assert!(!cache.inject_feed("https://a.example/twtxt.txt", p.clone()).await);
    }

    #[tokio::test]
    async fn refresh_builds_local_view_from_base_url() {
        let cache = FeedCache::new(config());
        let p = post("https://pod.example/user/alice/twtxt.txt", "hi");
        cache.inject_feed("https://pod.example/user/alice/twtxt.txt", p).await;
        cache.refresh().await;
        assert_eq!(cache.view(view::VIEW_LOCAL).await.len(), 1);
    }

    #[test]
    fn parses_single_follower_user_agent() {
        let (base, twter) = parse_client_user_agent("yarnd/0.1 (+https://a.example/user/bob/twtxt.txt; @bob)").unwrap();
        assert_eq!(base, "https://a.example");
        assert_eq!(twter.unwrap().nick, "bob");
    }

    #[test]
    fn sanitize_media_downgrades_non_permitted_targets() {
        let permitted = PatternList(vec![regex::Regex::new("^https://img\\.example/").unwrap()]);
        let mut elements = vec![
            Element::Media { text: "a".into(), target: "https://img.example/cat.png".into(), title: None },
            Element::Media { text: "b".into(), target: "https://evil.example/cat.png".into(), title: None },
        ];
        sanitize_media(&mut elements, &permitted);
        assert!(matches!(elements[0], Element::Media { .. }));
        assert!(matches!(elements[1], Element::Link { .. }));
    }

    #[test]
    fn sanitize_media_accepts_everything_when_list_is_empty() {
        let mut elements = vec![Element::Media { text: "a".into(), target: "https://anywhere.example/cat.png".into(), title: None }];
        sanitize_media(&mut elements, &PatternList::default());
        assert!(matches!(elements[0], Element::Media { .. }));
    }
}
