//! Periodically refreshed set of mail domains.
//!
//! A [`DomainLookup`] produces the current domain set; [`PollingSource`]
//! calls it on a fixed interval and publishes through a `watch` channel so
//! only the latest set is ever pending. A failed lookup ends the polling
//! task, which closes the channel.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SourceConfig;
use crate::error::SyncError;
use crate::metrics;

/// Deduplicated set of mail domains.
pub type DomainSet = BTreeSet<String>;

/// Extract the mail domain from an address or bare domain entry.
///
/// `user@example.com` yields `example.com`; `example.com` is accepted as
/// is. Returns `None` for blank lines, comments and entries without a
/// usable domain.
pub fn domain_of(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }

    let domain = match entry.split_once('@') {
        Some((_, domain)) => domain.trim(),
        None if entry.contains('.') => entry,
        None => return None,
    };

    let domain = domain.trim_end_matches('.');
    if domain.is_empty() || domain.contains('@') || domain.contains(char::is_whitespace) {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

/// Collect domains from mail address entries, warning about unusable ones.
pub fn collect_domains<I, S>(entries: I) -> DomainSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut domains = DomainSet::new();
    for entry in entries {
        let entry = entry.as_ref();
        match domain_of(entry) {
            Some(domain) => {
                domains.insert(domain);
            }
            None => {
                let trimmed = entry.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    warn!(addr = %trimmed, "mail without domain detected");
                }
            }
        }
    }
    domains
}

/// Produces the current domain set.
#[async_trait]
pub trait DomainLookup: Send + Sync {
    /// Fetch the full, current domain set.
    async fn fetch(&self) -> Result<DomainSet, SyncError>;
}

/// Domains listed inline in the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDomains {
    entries: Vec<String>,
}

impl StaticDomains {
    /// Create a lookup over fixed entries.
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl DomainLookup for StaticDomains {
    async fn fetch(&self) -> Result<DomainSet, SyncError> {
        Ok(collect_domains(&self.entries))
    }
}

/// Domains read from a file on every fetch, one entry per line.
#[derive(Debug, Clone)]
pub struct FileDomains {
    path: PathBuf,
}

impl FileDomains {
    /// Create a lookup over `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DomainLookup for FileDomains {
    async fn fetch(&self) -> Result<DomainSet, SyncError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SyncError::Lookup(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        Ok(collect_domains(contents.lines()))
    }
}

/// Union of several lookups; fails if any of them fails.
#[derive(Default)]
pub struct MergedDomains {
    lookups: Vec<Box<dyn DomainLookup>>,
}

impl MergedDomains {
    /// Create an empty union.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lookup.
    pub fn with(mut self, lookup: impl DomainLookup + 'static) -> Self {
        self.lookups.push(Box::new(lookup));
        self
    }

    /// Build the lookup described by the source configuration.
    pub fn from_config(config: &SourceConfig) -> Self {
        let mut merged = Self::new();
        if !config.domains.is_empty() {
            merged = merged.with(StaticDomains::new(config.domains.clone()));
        }
        if let Some(path) = &config.domains_file {
            merged = merged.with(FileDomains::new(path.clone()));
        }
        merged
    }
}

#[async_trait]
impl DomainLookup for MergedDomains {
    async fn fetch(&self) -> Result<DomainSet, SyncError> {
        let mut domains = DomainSet::new();
        for lookup in &self.lookups {
            domains.extend(lookup.fetch().await?);
        }
        Ok(domains)
    }
}

/// Polls a [`DomainLookup`] on a fixed interval.
pub struct PollingSource;

impl PollingSource {
    /// Spawn the polling task.
    ///
    /// The first fetch happens immediately. The returned receiver observes
    /// a change for every successful fetch; it is closed when a fetch fails
    /// or when `shutdown` completes.
    pub fn spawn<F>(
        lookup: Arc<dyn DomainLookup>,
        interval: Duration,
        shutdown: F,
    ) -> (watch::Receiver<DomainSet>, JoinHandle<()>)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(DomainSet::new());

        let handle = tokio::spawn(async move {
            debug!(interval = ?interval, "starting domain sync");
            tokio::pin!(shutdown);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown => {
                        debug!("domain sync exit");
                        return;
                    }

                    _ = ticker.tick() => {}
                }

                debug!("domain sync iteration");
                match lookup.fetch().await {
                    Ok(domains) => {
                        debug!(domain_count = domains.len(), "scan finished");
                        metrics::record_source_fetch(true, domains.len());
                        if tx.send(domains).is_err() {
                            info!("domain set receiver dropped, stopping sync");
                            return;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "domain lookup failed, closing domain channel");
                        metrics::record_source_fetch(false, 0);
                        return;
                    }
                }
            }
        });

        (rx, handle)
    }
}
