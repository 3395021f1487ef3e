use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use imageloader_service::config::Config;
use imageloader_service::{
    FetchError, FetchResult, ImageCoordinator, RequestHandle, ResourceKey, logging, metrics,
};
use tokio::sync::oneshot;
use tracing::level_filters::LevelFilter;

use crate::output::{self, Loaded, Report};

/// Loads images and keeps them in a bounded in-memory cache.
///
/// Every URL is loaded twice: first concurrently, then once more after all loads have
/// finished, which is answered from the cache for every image that fit into it.
#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// The URLs of the images to load.
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,

    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The severity level of logging output, overriding the configuration.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// Cancels all loads of the first pass that are still running after this long, like `200ms`.
    #[arg(long, value_parser = humantime::parse_duration)]
    cancel_after: Option<Duration>,
}

impl Cli {
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub async fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    logging::init_logging(&config);
    metrics::init_metrics(&config.metrics).context("failed to configure metrics")?;

    let coordinator = Arc::new(ImageCoordinator::from_config(
        &config,
        tokio::runtime::Handle::current(),
    ));

    let keys: Vec<_> = cli
        .urls
        .iter()
        .map(|url| {
            ResourceKey::parse_url(url).unwrap_or_else(|err| {
                tracing::debug!("`{url}` is not a valid URL: {err}");
                ResourceKey::new(url.as_str())
            })
        })
        .collect();

    let first = load_all(&coordinator, &keys, cli.cancel_after).await;
    output::print_pass("First pass", &first);

    let second = load_all(&coordinator, &keys, None).await;
    output::print_pass("Second pass", &second);

    output::print_summary(coordinator.cache());
    Ok(())
}

/// A fetch that has been issued but whose outcome is not known yet.
enum Pending {
    Started {
        key: ResourceKey,
        cached: bool,
        started: Instant,
        outcome: oneshot::Receiver<FetchResult<Loaded>>,
    },
    Rejected {
        key: ResourceKey,
        reason: String,
    },
}

/// Issues fetches for all `keys` at once, and waits for all of them to complete.
async fn load_all(
    coordinator: &Arc<ImageCoordinator>,
    keys: &[ResourceKey],
    cancel_after: Option<Duration>,
) -> Vec<Report> {
    let mut handles: Vec<RequestHandle> = Vec::new();
    let mut pending = Vec::with_capacity(keys.len());

    for key in keys {
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        match coordinator.fetch(key.clone(), move |result| {
            tx.send(result).ok();
        }) {
            Ok(handle) => {
                handles.extend(handle);
                pending.push(Pending::Started {
                    key: key.clone(),
                    cached: handle.is_none(),
                    started,
                    outcome: rx,
                });
            }
            Err(err) => pending.push(Pending::Rejected {
                key: key.clone(),
                reason: err.to_string(),
            }),
        }
    }

    let canceller = cancel_after.map(|delay| {
        let coordinator = Arc::clone(coordinator);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for handle in handles {
                coordinator.cancel(handle);
            }
        })
    });

    let mut reports = Vec::with_capacity(pending.len());
    for fetch in pending {
        let report = match fetch {
            Pending::Started {
                key,
                cached,
                started,
                outcome,
            } => {
                // A dropped sender means the fetch never completed.
                let result = outcome.await.unwrap_or(Err(FetchError::Cancelled));
                let cost = coordinator.cache().get(&key).map(|entry| entry.cost());
                Report {
                    key,
                    cached,
                    elapsed: started.elapsed(),
                    result: result.map_err(|err| err.failure_reason()),
                    cost,
                }
            }
            Pending::Rejected { key, reason } => Report {
                key,
                cached: false,
                elapsed: Duration::ZERO,
                result: Err(reason),
                cost: None,
            },
        };
        reports.push(report);
    }

    if let Some(canceller) = canceller {
        canceller.abort();
    }
    reports
}
