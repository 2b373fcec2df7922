//! Publishes each domain's DKIM TXT record at the DNS provider.
//!
//! For the single record `mail._domainkey.<domain>` / TXT:
//!
//! | matching records | action                         |
//! |------------------|--------------------------------|
//! | 0                | create                         |
//! | 1, same content  | nothing                        |
//! | 1, other content | update in place (same id)      |
//! | 2 or more        | nothing, ask for manual cleanup |

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{DnsFailure, DnsStage};
use crate::keys::{record_name, DomainRecord};
use crate::metrics::{self, DnsOutcome};
use crate::provider::{DnsProvider, RemoteTxtRecord, TXT};

/// Domains reconciled concurrently by default.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Domain -> provider zone id, kept for the process lifetime.
///
/// Entries are only ever added; a zone that moves at the provider keeps its
/// stale id until restart.
#[derive(Debug, Clone, Default)]
pub struct ZoneCache {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl ZoneCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached zone id for `domain`.
    pub fn get(&self, domain: &str) -> Option<String> {
        self.inner.read().get(domain).cloned()
    }

    /// Remember the zone id for `domain`.
    pub fn insert(&self, domain: &str, zone_id: &str) {
        let mut inner = self.inner.write();
        inner.insert(domain.to_string(), zone_id.to_string());
        metrics::record_zone_cache_size(inner.len());
    }

    /// Number of cached zones.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// What to do about a domain's remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// No record exists.
    Create,
    /// The single record already carries the desired content.
    Unchanged,
    /// The single record carries other content.
    Update {
        /// Identifier of the record to update.
        record_id: String,
    },
    /// More than one record matches; ownership is ambiguous.
    Ambiguous {
        /// Number of matching records.
        count: usize,
    },
}

/// Decide how to bring `existing` in line with `desired`.
pub fn plan(existing: &[RemoteTxtRecord], desired: &str) -> Plan {
    match existing {
        [] => Plan::Create,
        [record] if normalize_txt(&record.content) == normalize_txt(desired) => Plan::Unchanged,
        [record] => Plan::Update {
            record_id: record.id.clone(),
        },
        records => Plan::Ambiguous {
            count: records.len(),
        },
    }
}

/// Canonical form of TXT content for comparison.
///
/// Providers may return long values split into quoted character strings
/// (`"v=DKIM1; ... p=AB" "CD..."`); those are joined back together.
pub fn normalize_txt(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1]
            .split("\" \"")
            .collect::<String>()
    } else {
        trimmed.to_string()
    }
}

/// Result of reconciling one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsAction {
    /// A new record was created.
    Created {
        /// Identifier of the new record.
        record_id: String,
    },
    /// The existing record's content was replaced.
    Updated {
        /// Identifier of the updated record.
        record_id: String,
    },
    /// The record was already current.
    Unchanged,
    /// Several records matched; nothing was changed.
    Ambiguous {
        /// Number of matching records.
        count: usize,
    },
}

/// Reconciles DKIM TXT records against a [`DnsProvider`].
#[derive(Clone)]
pub struct Reconciler {
    provider: Arc<dyn DnsProvider>,
    zones: ZoneCache,
    concurrency: usize,
}

impl Reconciler {
    /// Create a reconciler using `zones` as its zone id cache.
    pub fn new(provider: Arc<dyn DnsProvider>, zones: ZoneCache) -> Self {
        Self {
            provider,
            zones,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Limit how many domains are reconciled at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Zone id cache.
    pub fn zones(&self) -> &ZoneCache {
        &self.zones
    }

    async fn zone_id(&self, domain: &str) -> Result<String, DnsFailure> {
        if let Some(zone_id) = self.zones.get(domain) {
            metrics::record_zone_cache(true);
            return Ok(zone_id);
        }
        metrics::record_zone_cache(false);

        let zone_id = self
            .provider
            .resolve_zone(domain)
            .await
            .map_err(|e| DnsFailure::new(DnsStage::ResolveZone, e))?;
        debug!(zone = domain, id = %zone_id, "resolved zone");
        self.zones.insert(domain, &zone_id);
        Ok(zone_id)
    }

    /// Bring the TXT record of `domain` in line with `txt`.
    pub async fn reconcile(&self, domain: &str, txt: &str) -> Result<DnsAction, DnsFailure> {
        let zone_id = self.zone_id(domain).await?;
        let name = record_name(domain);

        let existing = self
            .provider
            .list_records(&zone_id, &name, TXT)
            .await
            .map_err(|e| DnsFailure::new(DnsStage::ListRecords, e))?;

        match plan(&existing, txt) {
            Plan::Create => {
                let record_id = self
                    .provider
                    .create_record(&zone_id, &name, TXT, txt)
                    .await
                    .map_err(|e| DnsFailure::new(DnsStage::CreateRecord, e))?;
                Ok(DnsAction::Created { record_id })
            }
            Plan::Unchanged => Ok(DnsAction::Unchanged),
            Plan::Update { record_id } => {
                self.provider
                    .update_record(&zone_id, &record_id, txt)
                    .await
                    .map_err(|e| DnsFailure::new(DnsStage::UpdateRecord, e))?;
                Ok(DnsAction::Updated { record_id })
            }
            Plan::Ambiguous { count } => Ok(DnsAction::Ambiguous { count }),
        }
    }

    /// Reconcile every domain, isolating failures per domain.
    pub async fn reconcile_all(
        &self,
        records: &BTreeMap<String, DomainRecord>,
    ) -> BTreeMap<String, Result<DnsAction, DnsFailure>> {
        stream::iter(records.iter())
            .map(|(domain, record)| async move {
                let result = self.reconcile(domain, &record.txt).await;
                log_outcome(domain, &result);
                (domain.clone(), result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

fn log_outcome(domain: &str, result: &Result<DnsAction, DnsFailure>) {
    match result {
        Ok(DnsAction::Created { record_id }) => {
            info!(zone = domain, record_id = %record_id, "created DKIM record");
            metrics::record_dns_outcome(DnsOutcome::Created);
        }
        Ok(DnsAction::Updated { record_id }) => {
            info!(zone = domain, record_id = %record_id, "updated DKIM record");
            metrics::record_dns_outcome(DnsOutcome::Updated);
        }
        Ok(DnsAction::Unchanged) => {
            debug!(zone = domain, "record up to date, skipping update");
            metrics::record_dns_outcome(DnsOutcome::Unchanged);
        }
        Ok(DnsAction::Ambiguous { count }) => {
            warn!(
                zone = domain,
                count, "more than one DKIM record found, please clean up manually"
            );
            metrics::record_dns_outcome(DnsOutcome::Ambiguous);
        }
        Err(e) if e.stage == DnsStage::ResolveZone => {
            warn!(zone = domain, error = %e.source, "zone not managed or DNS API unavailable");
            metrics::record_dns_outcome(DnsOutcome::Failed(e.stage.as_str()));
        }
        Err(e) => {
            warn!(zone = domain, stage = %e.stage, error = %e.source, "DNS reconciliation failed");
            metrics::record_dns_outcome(DnsOutcome::Failed(e.stage.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str, content: &str) -> RemoteTxtRecord {
        RemoteTxtRecord {
            id: id.to_string(),
            name: "mail._domainkey.example.com".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_plan_create_when_missing() {
        assert_eq!(plan(&[], "v=DKIM1; k=rsa; p=AAAA"), Plan::Create);
    }

    #[test]
    fn test_plan_unchanged_when_equal() {
        let existing = [remote("r1", "v=DKIM1; k=rsa; p=AAAA")];
        assert_eq!(plan(&existing, "v=DKIM1; k=rsa; p=AAAA"), Plan::Unchanged);
    }

    #[test]
    fn test_plan_update_keeps_record_id() {
        let existing = [remote("r1", "v=DKIM1; k=rsa; p=OLD")];
        assert_eq!(
            plan(&existing, "v=DKIM1; k=rsa; p=NEW"),
            Plan::Update {
                record_id: "r1".to_string()
            }
        );
    }

    #[test]
    fn test_plan_ambiguous_for_duplicates() {
        let existing = [remote("r1", "a"), remote("r2", "b"), remote("r3", "c")];
        assert_eq!(plan(&existing, "a"), Plan::Ambiguous { count: 3 });
    }

    #[test]
    fn test_plan_ignores_provider_quoting() {
        let existing = [remote("r1", "\"v=DKIM1; k=rsa; p=AA\" \"BB\"")];
        assert_eq!(plan(&existing, "v=DKIM1; k=rsa; p=AABB"), Plan::Unchanged);
    }

    #[test]
    fn test_normalize_plain_content_untouched() {
        assert_eq!(normalize_txt("v=DKIM1; k=rsa; p=AA"), "v=DKIM1; k=rsa; p=AA");
        assert_eq!(normalize_txt("\"v=DKIM1\""), "v=DKIM1");
    }

    #[test]
    fn test_zone_cache_get_insert() {
        let cache = ZoneCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.get("example.com"), None);

        cache.insert("example.com", "zone-1");
        assert_eq!(cache.get("example.com"), Some("zone-1".to_string()));

        let shared = cache.clone();
        shared.insert("example.net", "zone-2");
        assert_eq!(cache.len(), 2);
    }
}
