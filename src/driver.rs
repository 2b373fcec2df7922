//! Batch orchestration: keys first, then signer tables and DNS.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::{DnsFailure, SyncError};
use crate::keys::{KeyReport, KeyStore};
use crate::metrics::{self, Timer};
use crate::opendkim::{ConfigEmitter, EmitOutcome};
use crate::reconcile::{DnsAction, Reconciler};
use crate::source::DomainSet;

/// Everything that happened during one batch.
#[derive(Debug)]
pub struct CycleReport {
    /// Domains in the input set.
    pub domains: DomainSet,
    /// Key pass results.
    pub keys: KeyReport,
    /// Signer table results.
    pub emit: EmitOutcome,
    /// DNS results, only for domains that passed the key pass.
    pub dns: BTreeMap<String, Result<DnsAction, DnsFailure>>,
    /// Wall time of the batch.
    pub elapsed: Duration,
}

impl CycleReport {
    /// Domains that failed at any stage.
    pub fn failed_domains(&self) -> BTreeSet<&str> {
        self.keys
            .failures
            .keys()
            .map(String::as_str)
            .chain(
                self.dns
                    .iter()
                    .filter(|(_, result)| result.is_err())
                    .map(|(domain, _)| domain.as_str()),
            )
            .collect()
    }

    /// DNS action taken for `domain`, if it succeeded.
    pub fn dns_action(&self, domain: &str) -> Option<&DnsAction> {
        self.dns.get(domain).and_then(|result| result.as_ref().ok())
    }

    /// Domains whose remote state needs manual cleanup.
    pub fn ambiguous_domains(&self) -> Vec<&str> {
        self.dns
            .iter()
            .filter(|(_, result)| matches!(result, Ok(DnsAction::Ambiguous { .. })))
            .map(|(domain, _)| domain.as_str())
            .collect()
    }
}

/// Drives batches from domain sets.
pub struct Driver {
    keys: KeyStore,
    emitter: ConfigEmitter,
    reconciler: Reconciler,
}

impl Driver {
    /// Create a driver from its three stages.
    pub fn new(keys: KeyStore, emitter: ConfigEmitter, reconciler: Reconciler) -> Self {
        Self {
            keys,
            emitter,
            reconciler,
        }
    }

    /// Process one domain set to completion.
    ///
    /// DNS is only touched for domains whose key and record files were
    /// written during this batch.
    pub async fn run_batch(&self, domains: &DomainSet) -> CycleReport {
        let timer = Timer::start();
        for domain in domains {
            info!(domain = %domain, "found DKIM domain");
        }

        let keys = self.keys.process(domains).await;

        let (emit, dns) = tokio::join!(
            self.emitter.emit(&keys.records),
            self.reconciler.reconcile_all(&keys.records)
        );

        let report = CycleReport {
            domains: domains.clone(),
            keys,
            emit,
            dns,
            elapsed: timer.elapsed(),
        };

        let failed = report.failed_domains().len();
        metrics::record_cycle(report.elapsed, domains.len(), failed);
        info!(
            domains = domains.len(),
            failed,
            ambiguous = report.ambiguous_domains().len(),
            elapsed = ?report.elapsed,
            "processing done"
        );
        report
    }

    /// Run a batch for every domain set received until `shutdown` completes.
    ///
    /// Only the wait for the next set is interrupted by `shutdown`; a batch
    /// that has started always runs to completion. Returns
    /// [`SyncError::SourceClosed`] if the source goes away first.
    pub async fn run<F>(
        &self,
        mut domains: watch::Receiver<DomainSet>,
        shutdown: F,
    ) -> Result<(), SyncError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown requested, driver stopping");
                    return Ok(());
                }

                changed = domains.changed() => {
                    if changed.is_err() {
                        error!("domain source closed, terminating");
                        return Err(SyncError::SourceClosed);
                    }
                }
            }

            let batch = domains.borrow_and_update().clone();
            self.run_batch(&batch).await;
        }
    }
}
