//! dkim-sync - keeps DKIM signing material provisioned for a set of mail domains.
//!
//! For every domain in a periodically refreshed set, this crate makes sure
//! that an RSA key pair exists on disk, that OpenDKIM's `KeyTable` and
//! `SigningTable` reference it, and that the matching public key is
//! published as a TXT record at Cloudflare.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ PollingSource│───▶│    Driver    │───▶│   KeyStore   │
//! │  (interval)  │    │ (one batch   │    │ (keys, .txt) │
//! └──────────────┘    │  at a time)  │    └──────┬───────┘
//!                     └──────────────┘           │
//!                              ┌─────────────────┴───────┐
//!                              ▼                         ▼
//!                     ┌──────────────────┐     ┌──────────────────┐
//!                     │  ConfigEmitter   │     │    Reconciler    │
//!                     │ KeyTable,        │     │ zone cache, TXT  │
//!                     │ SigningTable,    │     │ create / update  │
//!                     │ SIGUSR1 opendkim │     │ at Cloudflare    │
//!                     └──────────────────┘     └──────────────────┘
//! ```
//!
//! ## Failure handling
//!
//! - A failure for one domain (key IO, decoding, zone lookup, record API
//!   calls) is logged and that domain is skipped for the current batch.
//! - An existing private key is never overwritten, even if unreadable.
//! - Two or more matching TXT records are never touched; a warning asks
//!   for manual cleanup.
//! - If the domain source stops, the driver returns
//!   [`SyncError::SourceClosed`] and the process exits.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use dkim_sync::{ConfigEmitter, Driver, KeyStore, NoopReload, Reconciler, ZoneCache};
//! use std::sync::Arc;
//!
//! let provider = Arc::new(CloudflareClient::builder(token).build()?);
//! let driver = Driver::new(
//!     KeyStore::new("/etc/opendkim/keys"),
//!     ConfigEmitter::new("/etc/opendkim/keys", Arc::new(NoopReload)),
//!     Reconciler::new(provider, ZoneCache::new()),
//! );
//! let report = driver.run_batch(&domains).await;
//! ```

#![warn(missing_docs)]

pub mod cloudflare;
pub mod config;
pub mod driver;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod opendkim;
pub mod provider;
pub mod reconcile;
pub mod source;
pub mod telemetry;

// Re-export main types
pub use cloudflare::CloudflareClient;
pub use config::{CloudflareConfig, Config, KeysConfig, SignerConfig, SourceConfig, TelemetryConfig};
pub use driver::{CycleReport, Driver};
pub use error::{DnsFailure, DnsStage, KeyError, ProviderError, ReloadError, SyncError};
pub use keys::{DomainRecord, KeyReport, KeyStore};
pub use opendkim::{ConfigEmitter, EmitOutcome, NoopReload, ProcessSignalReload, SignerReload};
pub use provider::{DnsProvider, RemoteTxtRecord};
pub use reconcile::{DnsAction, Reconciler, ZoneCache};
pub use source::{DomainLookup, DomainSet, MergedDomains, PollingSource};
