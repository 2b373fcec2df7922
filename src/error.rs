//! Error types for dkim-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors: anything that stops the process rather than a single domain.
#[derive(Debug, Error)]
pub enum SyncError {
    /// IO error (config file, domain file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The configured sync interval is not a valid duration
    #[error("Invalid sync interval {value:?}: {source}")]
    Interval {
        /// Raw configured value.
        value: String,
        /// Parser error.
        #[source]
        source: humantime::DurationError,
    },

    /// DNS provider client could not be constructed
    #[error("DNS provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Domain lookup failed
    #[error("Domain lookup failed: {0}")]
    Lookup(String),

    /// The domain source stopped producing domain sets
    #[error("Domain source closed")]
    SourceClosed,
}

/// Per-domain key management failures.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Domain name cannot be used as a directory name
    #[error("Invalid domain name {0:?}")]
    InvalidDomain(String),

    /// Key directory could not be created
    #[error("Could not create key directory {}: {source}", path.display())]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Existing private key could not be read
    #[error("Failed to read private key {}, check permissions: {source}", path.display())]
    ReadPrivate {
        /// Key file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Existing private key is not a PKCS#1 PEM RSA key
    #[error("Failed to decode private key {}, unknown format: {source}", path.display())]
    DecodePrivate {
        /// Key file path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: rsa::pkcs1::Error,
    },

    /// RSA key generation failed
    #[error("Failed to generate key pair: {0}")]
    Generate(#[from] rsa::Error),

    /// Key could not be serialized
    #[error("Failed to encode {what}: {source}")]
    Encode {
        /// Which artifact was being encoded.
        what: &'static str,
        /// Encoder error.
        #[source]
        source: rsa::pkcs1::Error,
    },

    /// The blocking key task did not complete
    #[error("Key task failed: {0}")]
    Task(String),

    /// A key or record file could not be written
    #[error("Failed to write {what} {}: {source}", path.display())]
    Write {
        /// Which artifact was being written.
        what: &'static str,
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl KeyError {
    /// Short stage label used in logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            KeyError::InvalidDomain(_) => "validate",
            KeyError::CreateDir { .. } => "create_dir",
            KeyError::ReadPrivate { .. } => "read_private",
            KeyError::DecodePrivate { .. } => "decode_private",
            KeyError::Generate(_) => "generate",
            KeyError::Encode { .. } => "encode",
            KeyError::Write { .. } => "write",
            KeyError::Task(_) => "task",
        }
    }
}

/// DNS provider adapter failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No API token configured
    #[error("API token is empty")]
    MissingToken,

    /// API token contains characters not allowed in a header
    #[error("API token is not a valid header value")]
    InvalidToken,

    /// Base URL is not an absolute http(s) URL
    #[error("Invalid API base URL {url:?}: {reason}")]
    InvalidBaseUrl {
        /// Configured value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error messages returned by the API.
        message: String,
    },

    /// The domain is not hosted at this provider
    #[error("Zone not found for {0}")]
    ZoneNotFound(String),

    /// Response body could not be understood
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Remote call that failed while reconciling a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsStage {
    /// Zone identifier lookup.
    ResolveZone,
    /// Listing existing TXT records.
    ListRecords,
    /// Creating the TXT record.
    CreateRecord,
    /// Updating the TXT record.
    UpdateRecord,
}

impl DnsStage {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsStage::ResolveZone => "resolve_zone",
            DnsStage::ListRecords => "list_records",
            DnsStage::CreateRecord => "create_record",
            DnsStage::UpdateRecord => "update_record",
        }
    }
}

impl fmt::Display for DnsStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider error tagged with the reconciliation step it happened in.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct DnsFailure {
    /// Step that failed.
    pub stage: DnsStage,
    /// Provider error.
    #[source]
    pub source: ProviderError,
}

impl DnsFailure {
    pub(crate) fn new(stage: DnsStage, source: ProviderError) -> Self {
        Self { stage, source }
    }
}

/// Failures to notify the local signer of new tables.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// Running processes could not be listed
    #[error("Failed to enumerate processes: {0}")]
    Enumerate(String),

    /// No process matched the configured name
    #[error("No running {0} process found")]
    NoProcess(String),

    /// Every matching process refused the signal
    #[error("Failed to signal pid {pid}: {message}")]
    Signal {
        /// Target process id.
        pid: i32,
        /// OS error.
        message: String,
    },

    /// Signer reload is not available on this platform
    #[error("Signer reload is not supported on this platform")]
    Unsupported,
}
