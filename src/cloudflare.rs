//! Cloudflare v4 API implementation of [`DnsProvider`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CloudflareConfig;
use crate::error::ProviderError;
use crate::provider::{DnsProvider, RemoteTxtRecord};

/// The Cloudflare API base URL
const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL value meaning "automatic"
const AUTO_TTL: u32 = 1;

/// Response envelope shared by all endpoints.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordId {
    id: String,
}

#[derive(Debug, Serialize)]
struct NewRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
}

#[derive(Debug, Serialize)]
struct RecordPatch<'a> {
    content: &'a str,
}

/// Cloudflare DNS client
#[derive(Clone)]
pub struct CloudflareClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: HttpClient,
    base_url: String,
}

impl CloudflareClient {
    /// Create a client from configuration
    pub fn from_config(config: &CloudflareConfig) -> Result<Self, ProviderError> {
        Self::builder(&config.api_token)
            .base_url(&config.base_url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder(api_token: impl Into<String>) -> CloudflareClientBuilder {
        CloudflareClientBuilder::new(api_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    /// Unwrap the envelope, turning API failures into errors
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(ProviderError::MalformedResponse(e.to_string()));
            }
            Err(_) => {
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }
        };

        if !status.is_success() || !envelope.success {
            let message = envelope
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code))
                .collect::<Vec<_>>()
                .join("; ");
            if status.as_u16() == 429 {
                warn!("Rate limited by Cloudflare API");
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        envelope
            .result
            .ok_or_else(|| ProviderError::MalformedResponse("missing result".into()))
    }
}

#[async_trait]
impl DnsProvider for CloudflareClient {
    async fn resolve_zone(&self, domain: &str) -> Result<String, ProviderError> {
        let url = self.url("/zones");
        debug!(url = %url, domain, "GET zones");

        let response = self
            .inner
            .http
            .get(&url)
            .query(&[("name", domain)])
            .send()
            .await?;
        let zones: Vec<Zone> = self.handle_response(response).await?;

        zones
            .into_iter()
            .find(|zone| zone.name.eq_ignore_ascii_case(domain))
            .map(|zone| zone.id)
            .ok_or_else(|| ProviderError::ZoneNotFound(domain.to_string()))
    }

    async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
    ) -> Result<Vec<RemoteTxtRecord>, ProviderError> {
        let url = self.url(&format!("/zones/{zone_id}/dns_records"));
        debug!(url = %url, name, record_type, "GET dns_records");

        let response = self
            .inner
            .http
            .get(&url)
            .query(&[("type", record_type), ("name", name)])
            .send()
            .await?;
        let records: Vec<RemoteTxtRecord> = self.handle_response(response).await?;

        // The name filter is exact on the API side; keep it exact here too.
        Ok(records
            .into_iter()
            .filter(|record| record.name.eq_ignore_ascii_case(name))
            .collect())
    }

    async fn create_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        content: &str,
    ) -> Result<String, ProviderError> {
        let url = self.url(&format!("/zones/{zone_id}/dns_records"));
        debug!(url = %url, name, record_type, "POST dns_records");

        let body = NewRecord {
            record_type,
            name,
            content,
            ttl: AUTO_TTL,
        };
        let response = self.inner.http.post(&url).json(&body).send().await?;
        let created: RecordId = self.handle_response(response).await?;
        Ok(created.id)
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        content: &str,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!("/zones/{zone_id}/dns_records/{record_id}"));
        debug!(url = %url, "PATCH dns_records");

        let response = self
            .inner
            .http
            .patch(&url)
            .json(&RecordPatch { content })
            .send()
            .await?;
        let _: RecordId = self.handle_response(response).await?;
        Ok(())
    }
}

/// Builder for configuring a [`CloudflareClient`]
pub struct CloudflareClientBuilder {
    api_token: String,
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl CloudflareClientBuilder {
    /// Create a new builder with the given API token
    #[must_use]
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("dkim-sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the base URL (useful for testing)
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client
    pub fn build(self) -> Result<CloudflareClient, ProviderError> {
        let token = self.api_token.trim();
        if token.is_empty() {
            return Err(ProviderError::MissingToken);
        }

        let base_url = parse_base_url(&self.base_url)?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ProviderError::InvalidToken)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = HttpClient::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(CloudflareClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
            }),
        })
    }
}

fn parse_base_url(raw: &str) -> Result<String, ProviderError> {
    let invalid = |reason: String| ProviderError::InvalidBaseUrl {
        url: raw.to_string(),
        reason,
    };
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
