//! The `Server` value: every piece of shared state the HTTP surface and
//! background tasks need, held as explicit fields rather than process
//! singletons (spec §9 design note: "In the redesign, make these fields
//! of a Server value; pass it explicitly").

use std::sync::Arc;

use crate::archive::Archive;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::feed::cache::FeedCache;
use crate::ipp::IppState;
use crate::webmention::WebMentionState;
use crate::websub::WebSubState;

pub struct Server {
    pub config: Arc<Config>,
    pub cache: Arc<FeedCache>,
    pub archive: Arc<Archive>,
    pub dispatcher: Arc<Dispatcher>,
    pub ipp: Arc<IppState>,
    pub websub: Arc<WebSubState>,
    pub webmention: Arc<WebMentionState>,
    pub http: reqwest::Client,
}

impl Server {
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .timeout(config.http_client_timeout.as_ref().to_std()?)
            .user_agent(config.user_agent_template.clone())
            .build()?;

        Ok(Self {
            cache: Arc::new(FeedCache::new(config.clone())),
            archive: Arc::new(Archive::new(&config.data_dir)),
            ipp: Arc::new(IppState::new(config.clone(), http.clone())),
            websub: Arc::new(WebSubState::new(config.clone(), http.clone())),
            webmention: Arc::new(WebMentionState::new(config.clone(), http.clone())),
            dispatcher,
            http,
            config,
        })
    }

    pub fn cache_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.config.data_dir).join("cache")
    }

    pub fn websub_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.config.data_dir).join("websub.json")
    }

    /// Applies a post authored on this pod: injects it into the cache,
    /// then fans it out across all three dissemination protocols (spec §3
    /// data flow: "Local post → E (inject) + F (publish to peers) + G
    /// (notify subscribers) + H (mention targets)"). The web UI that
    /// actually accepts a new post from its owner is out of scope; this is
    /// the engine-side half of that flow.
    pub async fn publish_local_post(&self, feed_uri: &str, post: crate::feed::model::Post) {
        self.cache.inject_feed(feed_uri, post.clone()).await;
        self.cache.refresh().await;

        self.ipp.publish(&self.dispatcher, feed_uri).await;
        self.websub.notify_subscribers(feed_uri).await;

        for (_, uri) in post.mentions() {
            if let Some(target) = uri {
                self.webmention.enqueue_outbound(feed_uri.to_string(), target.to_string()).await;
            }
        }
    }
}

impl Clone for Server {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            cache: self.cache.clone(),
            archive: self.archive.clone(),
            dispatcher: self.dispatcher.clone(),
            ipp: self.ipp.clone(),
            websub: self.websub.clone(),
            webmention: self.webmention.clone(),
            http: self.http.clone(),
        }
    }
}
