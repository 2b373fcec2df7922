//! DNS provider abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Record type managed by this crate.
pub const TXT: &str = "TXT";

/// A record as currently stored at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTxtRecord {
    /// Provider record identifier.
    pub id: String,
    /// Fully qualified record name.
    pub name: String,
    /// Record content.
    pub content: String,
}

/// Minimal record API needed to publish DKIM keys.
///
/// Transport, authentication and rate limiting are the implementation's
/// concern.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Find the zone identifier hosting `domain`.
    async fn resolve_zone(&self, domain: &str) -> Result<String, ProviderError>;

    /// List records in `zone_id` with exactly this name and type.
    async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
    ) -> Result<Vec<RemoteTxtRecord>, ProviderError>;

    /// Create a record and return its identifier.
    async fn create_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        content: &str,
    ) -> Result<String, ProviderError>;

    /// Replace the content of an existing record.
    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        content: &str,
    ) -> Result<(), ProviderError>;
}
