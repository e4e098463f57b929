use anyhow::{anyhow, Result};
use chrono::Duration;
use regex::Regex;

/// Feature bitset (spec §6, "Features"). Kept as named bools rather than
/// an actual bitset: the set is small and fixed, and named fields read
/// better at every call site than `features.contains(Feature::Ipp)`.
#[derive(Clone, Debug)]
pub struct Features {
    pub ipp: bool,
    pub websub: bool,
    pub webmention: bool,
    pub moving_average_feed_refresh: bool,
}

#[derive(Clone)]
pub struct HttpPort(u16);

#[derive(Clone)]
pub struct TaskInterval(Duration);

#[derive(Clone)]
pub struct ByteLimit(u64);

#[derive(Clone)]
pub struct ItemLimit(usize);

/// A compiled list of patterns used to match feed URIs, e.g. `BlockedFeeds`
/// and `PermittedImages`.
#[derive(Clone, Default)]
pub struct PatternList(pub Vec<Regex>);

impl PatternList {
    pub fn matches(&self, value: &str) -> bool {
        self.0.iter().any(|re| re.is_match(value))
    }
}

#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub base_url: String,
    pub data_dir: String,
    pub user_agent_template: String,

    pub max_cache_fetchers: usize,
    pub max_fetch_limit: ByteLimit,
    pub max_cache_ttl: TaskInterval,
    pub max_cache_items: ItemLimit,
    pub fetch_interval: TaskInterval,

    pub features: Features,
    pub blocked_feeds: PatternList,
    pub permitted_images: PatternList,
    pub forced_refresh_hosts: Vec<String>,

    pub dispatcher_max_workers: usize,
    pub dispatcher_max_queue: usize,

    pub http_client_timeout: TaskInterval,
    pub fetch_client_timeout: TaskInterval,
}

impl Config {
    pub fn new() -> Result<Self> {
        let http_port: HttpPort = default_env("HTTP_PORT", "8000").try_into()?;
        let base_url = require_env("BASE_URL")?;
        let data_dir = default_env("DATA_DIR", "./data");

        let default_user_agent = format!("twtd/{} (+{})", version()?, base_url);
        let user_agent_template = default_env("USER_AGENT", &default_user_agent);

        let max_cache_fetchers = default_env("MAX_CACHE_FETCHERS", "10").parse::<usize>()?;
        let max_fetch_limit: ByteLimit = default_env("MAX_FETCH_LIMIT", "2097152").try_into()?;
        let max_cache_ttl: TaskInterval = default_env("MAX_CACHE_TTL", "336h").try_into()?;
        let max_cache_items: ItemLimit = default_env("MAX_CACHE_ITEMS", "50").try_into()?;
        let fetch_interval: TaskInterval = default_env("FETCH_INTERVAL", "15m").try_into()?;

        let features = Features {
            ipp: default_env("FEATURE_IPP", "true").parse::<bool>()?,
            websub: default_env("FEATURE_WEBSUB", "true").parse::<bool>()?,
            webmention: default_env("FEATURE_WEBMENTION", "true").parse::<bool>()?,
            moving_average_feed_refresh: default_env("FEATURE_MOVING_AVERAGE", "true")
                .parse::<bool>()?,
        };

        let blocked_feeds = compile_pattern_list(&optional_env("BLOCKED_FEEDS"))?;
        let permitted_images = compile_pattern_list(&optional_env("PERMITTED_IMAGES"))?;
        let forced_refresh_hosts = split_list(&optional_env("FORCE_REFRESH_HOSTS"));

        let dispatcher_max_workers =
            default_env("DISPATCHER_MAX_WORKERS", "8").parse::<usize>()?;
        let dispatcher_max_queue = default_env("DISPATCHER_MAX_QUEUE", "256").parse::<usize>()?;

        let http_client_timeout: TaskInterval = default_env("HTTP_CLIENT_TIMEOUT", "5s").try_into()?;
        let fetch_client_timeout: TaskInterval =
            default_env("FETCH_CLIENT_TIMEOUT", "30s").try_into()?;

        Ok(Self {
            version: version()?,
            http_port,
            base_url,
            data_dir,
            user_agent_template,
            max_cache_fetchers,
            max_fetch_limit,
            max_cache_ttl,
            max_cache_items,
            fetch_interval,
            features,
            blocked_feeds,
            permitted_images,
            forced_refresh_hosts,
            dispatcher_max_workers,
            dispatcher_max_queue,
            http_client_timeout,
            fetch_client_timeout,
        })
    }
}

#[cfg(test)]
impl Config {
    /// Minimal config for unit tests elsewhere in the crate that need a
    /// `Config` but don't exercise env-var parsing.
    pub fn for_tests(base_url: &str) -> Self {
        Self {
            version: "test".to_string(),
            http_port: HttpPort(8000),
            base_url: base_url.to_string(),
            data_dir: "./data".to_string(),
            user_agent_template: format!("twtd/test (+{})", base_url),
            max_cache_fetchers: 4,
            max_fetch_limit: ByteLimit(2_097_152),
            max_cache_ttl: TaskInterval(Duration::hours(336)),
            max_cache_items: ItemLimit(50),
            fetch_interval: TaskInterval(Duration::minutes(15)),
            features: Features { ipp: true, websub: true, webmention: true, moving_average_feed_refresh: true },
            blocked_feeds: PatternList::default(),
            permitted_images: PatternList::default(),
            forced_refresh_hosts: Vec::new(),
            dispatcher_max_workers: 4,
            dispatcher_max_queue: 64,
            http_client_timeout: TaskInterval(Duration::seconds(5)),
            fetch_client_timeout: TaskInterval(Duration::seconds(30)),
        }
    }
}

fn compile_pattern_list(value: &str) -> Result<PatternList> {
    let patterns = split_list(value)
        .into_iter()
        .map(|pattern| Regex::new(&pattern).map_err(|err| anyhow!(err)))
        .collect::<Result<Vec<Regex>>>()?;
    Ok(PatternList(patterns))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        })
        .collect()
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|err| anyhow::Error::new(err).context(anyhow!("{} must be set", name)))
}

fn optional_env(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or(default_value.to_string())
}

pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(anyhow!("one of GIT_HASH or CARGO_PKG_VERSION must be set"))
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse::<u16>().map(Self).map_err(|err| {
            anyhow::Error::new(err).context(anyhow!("parsing HTTP_PORT into u16 failed"))
        })
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for TaskInterval {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse_chrono(&value)
            .map_err(|err| anyhow!(err).context("parsing task interval into duration failed"))?;
        Ok(Self(duration))
    }
}

impl AsRef<Duration> for TaskInterval {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for ByteLimit {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(value.parse::<u64>().map_err(|err| {
            anyhow::Error::new(err).context(anyhow!("parsing byte limit into u64 failed"))
        })?))
    }
}

impl AsRef<u64> for ByteLimit {
    fn as_ref(&self) -> &u64 {
        &self.0
    }
}

impl TryFrom<String> for ItemLimit {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(value.parse::<usize>().map_err(|err| {
            anyhow::Error::new(err).context(anyhow!("parsing item limit into usize failed"))
        })?))
    }
}

impl AsRef<usize> for ItemLimit {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_list_matches_any() {
        let list = compile_pattern_list("^https://evil\\.example/;spam").unwrap();
        assert!(list.matches("https://evil.example/twtxt.txt"));
        assert!(list.matches("https://ok.example/spammy.txt"));
        assert!(!list.matches("https://ok.example/twtxt.txt"));
    }

    #[test]
    fn task_interval_parses_human_durations() {
        let interval: TaskInterval = "15m".to_string().try_into().unwrap();
        assert_eq!(interval.as_ref().num_minutes(), 15);
    }
}
