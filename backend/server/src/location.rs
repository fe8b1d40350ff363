//! # Location labels
//!
//! Turns a respondent IP into a coarse `City, Region, Country` label stored with the entry metadata.
//!
//! - Only used when the client did not send a label of its own
//! - Lookups go to ip-api.com with a short timeout; failures and unknown addresses become `Unknown`
//! - Results, fallbacks included, are cached so a burst from one address costs one lookup
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cache::TtlCache;

pub const UNKNOWN: &str = "Unknown";
pub const LOCALHOST: &str = "Localhost";

const IP_API_ENDPOINT: &str = "http://ip-api.com/json";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(4);

#[async_trait]
pub trait LocationResolver: Send + Sync {
    /// `None` when lookups are disabled.
    async fn label_for(&self, ip: &str) -> Option<String>;
}

/// Resolver for deployments without outbound lookups.
pub struct NoLookups;

#[async_trait]
impl LocationResolver for NoLookups {
    async fn label_for(&self, _ip: &str) -> Option<String> {
        None
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    city: Option<String>,
    region_name: Option<String>,
    country: Option<String>,
}

impl IpApiResponse {
    fn label(&self) -> String {
        if self.status != "success" {
            return UNKNOWN.to_string();
        }

        let parts: Vec<&str> = [&self.city, &self.region_name, &self.country]
            .into_iter()
            .flatten()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            UNKNOWN.to_string()
        } else {
            parts.join(", ")
        }
    }
}

pub struct IpApiResolver {
    client: Client,
    endpoint: String,
    cache: Mutex<TtlCache<String, String>>,
}

impl IpApiResolver {
    pub fn new(cache: TtlCache<String, String>) -> Self {
        Self::with_endpoint(IP_API_ENDPOINT, cache)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, cache: TtlCache<String, String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            cache: Mutex::new(cache),
        }
    }

    async fn lookup(&self, ip: &str) -> Result<String, reqwest::Error> {
        let url = format!("{}/{ip}", self.endpoint);

        let response: IpApiResponse = self
            .client
            .get(url)
            .query(&[("fields", "status,city,regionName,country")])
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        Ok(response.label())
    }
}

#[async_trait]
impl LocationResolver for IpApiResolver {
    async fn label_for(&self, ip: &str) -> Option<String> {
        let key = normalize_ip(ip);
        if key.is_empty() {
            return None;
        }

        if let Some(label) = self.cache.lock().await.get(&key) {
            return Some(label);
        }

        let label = if is_loopback(&key) {
            LOCALHOST.to_string()
        } else {
            self.lookup(&key).await.unwrap_or_else(|e| {
                warn!("IP location lookup failed: {e}");
                UNKNOWN.to_string()
            })
        };

        self.cache.lock().await.insert(key, label.clone());

        Some(label)
    }
}

/// Strips the IPv4-mapped IPv6 prefix proxies tend to add.
pub fn normalize_ip(ip: &str) -> String {
    let ip = ip.trim();

    match ip.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("::ffff:") => ip[7..].to_string(),
        _ => ip.to_string(),
    }
}

fn is_loopback(ip: &str) -> bool {
    matches!(ip, "::1" | "127.0.0.1")
}
