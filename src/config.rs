//! Environment-driven configuration, built once at startup

use crate::error::{AppError, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_UPSTREAM_URL: &str =
    "https://us-east1-climacell-platform-production.cloudfunctions.net/weather-data";

/// Runtime configuration. Constructed from the environment in `main` and
/// passed into constructors; nothing reads environment variables after
/// startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string (required)
    pub database_url: String,
    /// Base URL of the upstream batch API
    pub upstream_base_url: String,
    /// Redis connection string for the side-cache
    pub redis_url: String,
    /// Default TTL for cache entries
    pub cache_ttl: Duration,
    /// Rows per bulk-insert transaction
    pub insert_chunk_size: usize,
    /// Pause between ingestion cycles
    pub ingest_interval: Duration,
    /// Ceiling on concurrent page fetches within one batch
    pub page_concurrency: usize,
    /// Per-request timeout for upstream calls
    pub request_timeout: Duration,
    /// Serving API bind address
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// `DATABASE_URL` is required; a missing value is a startup-fatal error.
    /// Malformed numeric values are also fatal rather than silently defaulted.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = get("DATABASE_URL")
            .ok_or_else(|| AppError::Config("DATABASE_URL is not set".into()))?;

        let upstream_base_url =
            get("UPSTREAM_BASE_URL").unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
        let redis_url =
            get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379/0".to_string());

        let cache_ttl = Duration::from_secs(parse_var(&get, "CACHE_TTL_SECS", 300)?);
        let insert_chunk_size = parse_var(&get, "INSERT_CHUNK_SIZE", 4000)?;
        let ingest_interval = Duration::from_secs(parse_var(&get, "INGEST_INTERVAL_SECS", 300)?);
        let page_concurrency = parse_var(&get, "PAGE_CONCURRENCY", 8)?;
        let request_timeout = Duration::from_secs(parse_var(&get, "REQUEST_TIMEOUT_SECS", 30)?);
        let listen_addr = parse_var(&get, "LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        Ok(Self {
            database_url,
            upstream_base_url,
            redis_url,
            cache_ttl,
            insert_chunk_size,
            ingest_interval,
            page_concurrency,
            request_timeout,
            listen_addr,
        })
    }
}

fn parse_var<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("invalid value for {key}: {raw}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_applied() {
        let config =
            Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/weather")]))
                .unwrap();

        assert_eq!(config.database_url, "postgres://localhost/weather");
        assert_eq!(config.redis_url, "redis://localhost:6379/0");
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.insert_chunk_size, 4000);
        assert_eq!(config.ingest_interval, Duration::from_secs(300));
        assert_eq!(config.page_concurrency, 8);
        assert_eq!(config.listen_addr, "0.0.0.0:3000".parse().unwrap());
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn malformed_numeric_is_fatal() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/weather"),
            ("INSERT_CHUNK_SIZE", "a lot"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn overrides_win() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/weather"),
            ("INSERT_CHUNK_SIZE", "2000"),
            ("INGEST_INTERVAL_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.insert_chunk_size, 2000);
        assert_eq!(config.ingest_interval, Duration::from_secs(60));
    }
}
