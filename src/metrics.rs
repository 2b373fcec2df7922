//! Metrics instrumentation for dkim-sync.
//!
//! All metrics are prefixed with `dkim_sync.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a completed batch.
pub fn record_cycle(duration: std::time::Duration, domains: usize, failed: usize) {
    counter!("dkim_sync.cycle.count").increment(1);
    histogram!("dkim_sync.cycle.duration.seconds").record(duration.as_secs_f64());
    gauge!("dkim_sync.cycle.domains").set(domains as f64);
    gauge!("dkim_sync.cycle.failed_domains").set(failed as f64);
}

/// Record a domain source fetch.
pub fn record_source_fetch(ok: bool, domains: usize) {
    let result = if ok { "success" } else { "error" };
    counter!("dkim_sync.source.fetch.count", "result" => result).increment(1);
    if ok {
        gauge!("dkim_sync.source.domains").set(domains as f64);
    }
}

/// Record the key handling outcome for one domain.
pub fn record_key_outcome(outcome: KeyOutcome) {
    let outcome_str = match outcome {
        KeyOutcome::Generated => "generated",
        KeyOutcome::Loaded => "loaded",
        KeyOutcome::Failed(stage) => stage,
    };

    counter!("dkim_sync.keys.count", "outcome" => outcome_str).increment(1);
}

/// Key handling outcomes.
#[derive(Debug, Clone, Copy)]
pub enum KeyOutcome {
    /// A new key pair was generated and persisted.
    Generated,
    /// An existing private key was loaded.
    Loaded,
    /// The domain failed at the given stage.
    Failed(&'static str),
}

/// Record a DNS reconciliation outcome.
pub fn record_dns_outcome(outcome: DnsOutcome) {
    let outcome_str = match outcome {
        DnsOutcome::Created => "created",
        DnsOutcome::Updated => "updated",
        DnsOutcome::Unchanged => "unchanged",
        DnsOutcome::Ambiguous => "ambiguous",
        DnsOutcome::Failed(stage) => stage,
    };

    counter!("dkim_sync.dns.count", "outcome" => outcome_str).increment(1);
}

/// DNS reconciliation outcomes.
#[derive(Debug, Clone, Copy)]
pub enum DnsOutcome {
    /// Record created.
    Created,
    /// Record content replaced.
    Updated,
    /// Record already current.
    Unchanged,
    /// Multiple matching records, left alone.
    Ambiguous,
    /// A remote call failed at the given stage.
    Failed(&'static str),
}

/// Record a zone cache lookup.
pub fn record_zone_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("dkim_sync.zone_cache.count", "result" => result).increment(1);
}

/// Record the zone cache size.
pub fn record_zone_cache_size(zones: usize) {
    gauge!("dkim_sync.zone_cache.size").set(zones as f64);
}

/// Record a signer table write and reload attempt.
pub fn record_signer_emit(result: EmitResult) {
    let result_str = match result {
        EmitResult::Reloaded => "reloaded",
        EmitResult::ReloadFailed => "reload_failed",
        EmitResult::WriteFailed => "write_failed",
    };

    counter!("dkim_sync.signer.emit.count", "result" => result_str).increment(1);
}

/// Signer emit results.
#[derive(Debug, Clone, Copy)]
pub enum EmitResult {
    /// Tables written and signer signalled.
    Reloaded,
    /// Tables written, signer not reloaded.
    ReloadFailed,
    /// Tables not written.
    WriteFailed,
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
