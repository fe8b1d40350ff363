use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend {other}, expected redis or memory")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub atomic_writes: bool,
    pub atomic_retries: u32,
    pub store_timeout: Duration,
    pub location_lookups: bool,
    pub location_cache_ttl: Duration,
    pub location_cache_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let redis_url = match read_secret("REDIS_URL") {
            Some(url) => url,
            None => try_load("REDIS_URL", "redis://redis:6379")?,
        };

        Ok(Self {
            port: try_load("RUST_PORT", "5000")?,
            store_backend: try_load("STORE_BACKEND", "redis")?,
            redis_url,
            atomic_writes: try_load("ATOMIC_WRITES", "true")?,
            atomic_retries: try_load("ATOMIC_RETRIES", "3")?,
            store_timeout: Duration::from_millis(try_load("STORE_TIMEOUT_MS", "2000")?),
            location_lookups: try_load("LOCATION_LOOKUPS", "true")?,
            location_cache_ttl: Duration::from_secs(try_load("LOCATION_CACHE_TTL_SECS", "86400")?),
            location_cache_capacity: try_load("LOCATION_CACHE_CAPACITY", "10000")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            store_backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            atomic_writes: true,
            atomic_retries: 3,
            store_timeout: Duration::from_secs(2),
            location_lookups: false,
            location_cache_ttl: Duration::from_secs(60 * 60 * 24),
            location_cache_capacity: 10_000,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse(key, &value)
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
}
