use std::env;
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_subscriber::prelude::*;

use twtd::config::Config;
use twtd::dispatcher::Dispatcher;
use twtd::feed::cache::FetchRequestSpec;
use twtd::fetcher::ProtocolFetcher;
use twtd::http::build_router;
use twtd::http::context::WebContext;
use twtd::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "twtd=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = twtd::config::version()?;
    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{}", version);
            std::process::exit(0);
        }
    });

    let config = Config::new()?;
    let dispatcher = Arc::new(Dispatcher::start(
        config.dispatcher_max_workers,
        config.dispatcher_max_queue,
        CancellationToken::new(),
    ));

    let server = Server::new(config, dispatcher.clone())?;
    server.cache.load(&server.cache_path()).await;
    server.websub.load(&server.websub_path()).await;

    let app = build_router(WebContext::new(server.clone()));

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        };
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }
            tracker.close();
            inner_token.cancel();
        });
    }

    // Dispatcher janitor: sweeps terminal/stale tasks out of the registry.
    {
        let dispatcher = dispatcher.clone();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                tokio::select! {
                    () = inner_token.cancelled() => break,
                    _ = interval.tick() => dispatcher.run_janitor_once().await,
                }
            }
        });
    }

    // Feed fetch ticker, on the configured interval (or moving-average
    // clamp per feed, decided inside `fetch_feeds`/`should_refresh`).
    {
        let server = server.clone();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let interval = server.config.fetch_interval.as_ref().to_std().unwrap_or(std::time::Duration::from_secs(900));
            let sleeper = tokio::time::sleep(interval);
            tokio::pin!(sleeper);
            loop {
                tokio::select! {
                    () = inner_token.cancelled() => break,
                    () = &mut sleeper => {
                        let requests: Vec<FetchRequestSpec> = server.cache
                            .known_feed_uris()
                            .await
                            .into_iter()
                            .map(|uri| FetchRequestSpec { uri, force: false })
                            .collect();
                        let fetcher = ProtocolFetcher::new(server.http.clone());
                        let followers = server.cache.public_followers().await;
                        server.cache.fetch_feeds(&fetcher, requests, &followers, &server.archive).await;
                        server.cache.evict_stale_peers().await;
                        server.cache.converge(&server.archive, &server.http).await;
                        if let Err(err) = server.cache.store(&server.cache_path()).await {
                            tracing::warn!(error = ?err, "cache persist failed");
                        }
                        sleeper.as_mut().reset(tokio::time::Instant::now() + interval);
                    }
                }
            }
        });
    }

    // WebSub: pending-subscription cleanup and subscriber-table persistence.
    if server.config.features.websub {
        {
            let server = server.clone();
            let inner_token = token.clone();
            tracker.spawn(async move {
                let mut cleanup = tokio::time::interval(std::time::Duration::from_secs(300));
                let mut save = tokio::time::interval(std::time::Duration::from_secs(60));
                loop {
                    tokio::select! {
                        () = inner_token.cancelled() => break,
                        _ = cleanup.tick() => server.websub.run_cleanup_once().await,
                        _ = save.tick() => {
                            if let Err(err) = server.websub.store(&server.websub_path()).await {
                                tracing::warn!(error = ?err, "websub persist failed");
                            }
                        }
                    }
                }
            });
        }

        let server = server.clone();
        tracker.spawn(async move {
            let dispatcher = server.dispatcher.clone();
            let inner_server = server.clone();
            server
                .websub
                .run_notify_processor(move |topic| {
                    let server = inner_server.clone();
                    let job: twtd::dispatcher::Job = Box::new(move || {
                        Box::pin(async move {
                            let fetcher = ProtocolFetcher::new(server.http.clone());
                            let requests = vec![FetchRequestSpec { uri: topic, force: true }];
                            let followers = server.cache.public_followers().await;
                            server.cache.fetch_feeds(&fetcher, requests, &followers, &server.archive).await;
                            Ok(serde_json::json!({ "notified": true }))
                        })
                    });
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        let _ = dispatcher.dispatch(job).await;
                    });
                })
                .await;
        });
    }

    // WebMention inbox/outbox processors.
    if server.config.features.webmention {
        {
            let server = server.clone();
            tracker.spawn(async move {
                server
                    .webmention
                    .run_inbox_processor(move |source, target, data| {
                        tracing::info!(source, target, has_microformats = data.is_some(), "webmention received");
                    })
                    .await;
            });
        }

        let server = server.clone();
        tracker.spawn(async move {
            server.webmention.run_outbox_processor().await;
        });
    }

    {
        let http_port = *server.config.http_port.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", http_port)).await.unwrap();

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }
            inner_token.cancel();
        });
    }

    tracker.wait().await;

    dispatcher.stop();
    Ok(())
}
