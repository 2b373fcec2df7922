//! Shared test infrastructure for pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dkim_sync::keys::record_name;
use dkim_sync::{
    ConfigEmitter, DnsProvider, DomainSet, Driver, KeyStore, ProviderError, Reconciler,
    ReloadError, RemoteTxtRecord, SignerReload, ZoneCache,
};

// --- Constants ---

/// Small keys keep key generation fast in debug builds.
pub const TEST_KEY_BITS: usize = 1024;

// --- MockProvider ---

/// A provider call, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ResolveZone(String),
    List {
        zone_id: String,
        name: String,
        record_type: String,
    },
    Create {
        zone_id: String,
        name: String,
        record_type: String,
        content: String,
    },
    Update {
        zone_id: String,
        record_id: String,
        content: String,
    },
}

#[derive(Default)]
struct MockState {
    zones: HashMap<String, String>,
    records: HashMap<String, Vec<RemoteTxtRecord>>,
    failing_lists: HashSet<String>,
    failing_creates: HashSet<String>,
    failing_updates: HashSet<String>,
    write_delay: Option<Duration>,
    calls: Vec<Call>,
    next_id: u32,
}

/// In-memory DNS provider that records every call.
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host `domain` in `zone_id`.
    pub fn with_zone(self, domain: &str, zone_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .zones
            .insert(domain.to_string(), zone_id.to_string());
        self
    }

    /// Pre-seed a TXT record. Returns its id.
    pub fn add_record(&self, zone_id: &str, name: &str, content: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("seed-{}", state.next_id);
        state
            .records
            .entry(zone_id.to_string())
            .or_default()
            .push(RemoteTxtRecord {
                id: id.clone(),
                name: name.to_string(),
                content: content.to_string(),
            });
        id
    }

    /// Make every list call in `zone_id` fail.
    pub fn fail_lists_in(&self, zone_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_lists
            .insert(zone_id.to_string());
    }

    /// Make every create call in `zone_id` fail.
    pub fn fail_creates_in(&self, zone_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_creates
            .insert(zone_id.to_string());
    }

    /// Make every update call in `zone_id` fail.
    pub fn fail_updates_in(&self, zone_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_updates
            .insert(zone_id.to_string());
    }

    /// Delay every create and update call.
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().write_delay = Some(delay);
        self
    }

    async fn write_pause(&self) {
        let delay = self.state.lock().unwrap().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn records(&self, zone_id: &str) -> Vec<RemoteTxtRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(zone_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Only create and update calls.
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Create { .. } | Call::Update { .. }))
            .collect()
    }

    pub fn zone_lookups(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::ResolveZone(_)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}

#[async_trait]
impl DnsProvider for MockProvider {
    async fn resolve_zone(&self, domain: &str) -> Result<String, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ResolveZone(domain.to_string()));
        state
            .zones
            .get(domain)
            .cloned()
            .ok_or_else(|| ProviderError::ZoneNotFound(domain.to_string()))
    }

    async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
    ) -> Result<Vec<RemoteTxtRecord>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::List {
            zone_id: zone_id.to_string(),
            name: name.to_string(),
            record_type: record_type.to_string(),
        });
        if state.failing_lists.contains(zone_id) {
            return Err(ProviderError::Api {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        Ok(state
            .records
            .get(zone_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.name == name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        content: &str,
    ) -> Result<String, ProviderError> {
        self.write_pause().await;
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create {
            zone_id: zone_id.to_string(),
            name: name.to_string(),
            record_type: record_type.to_string(),
            content: content.to_string(),
        });
        if state.failing_creates.contains(zone_id) {
            return Err(ProviderError::Api {
                status: 400,
                message: "record quota exceeded".to_string(),
            });
        }
        state.next_id += 1;
        let id = format!("rec-{}", state.next_id);
        state
            .records
            .entry(zone_id.to_string())
            .or_default()
            .push(RemoteTxtRecord {
                id: id.clone(),
                name: name.to_string(),
                content: content.to_string(),
            });
        Ok(id)
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        content: &str,
    ) -> Result<(), ProviderError> {
        self.write_pause().await;
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Update {
            zone_id: zone_id.to_string(),
            record_id: record_id.to_string(),
            content: content.to_string(),
        });
        if state.failing_updates.contains(zone_id) {
            return Err(ProviderError::Api {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        let record = state
            .records
            .get_mut(zone_id)
            .and_then(|records| records.iter_mut().find(|r| r.id == record_id))
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: "record not found".to_string(),
            })?;
        record.content = content.to_string();
        Ok(())
    }
}

// --- CountingReload ---

/// Signer reload that only counts invocations.
#[derive(Default)]
pub struct CountingReload {
    count: AtomicUsize,
}

impl CountingReload {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl SignerReload for CountingReload {
    fn reload(&self) -> Result<usize, ReloadError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }
}

// --- Builders ---

pub fn domains(names: &[&str]) -> DomainSet {
    names.iter().map(|n| n.to_string()).collect()
}

/// Driver over `dir` with fast test keys.
pub fn build_driver(dir: &Path, provider: Arc<MockProvider>, reload: Arc<CountingReload>) -> Driver {
    Driver::new(
        KeyStore::new(dir).with_key_bits(TEST_KEY_BITS),
        ConfigEmitter::new(dir, reload),
        Reconciler::new(provider, ZoneCache::new()),
    )
}

pub fn dkim_name(domain: &str) -> String {
    record_name(domain)
}

/// Write a file that cannot be decoded as a private key.
pub fn corrupt_private_key(dir: &Path, domain: &str) {
    let domain_dir = dir.join(domain);
    std::fs::create_dir_all(&domain_dir).unwrap();
    std::fs::write(domain_dir.join("mail.private"), "-----BEGIN GARBAGE-----\n").unwrap();
}
