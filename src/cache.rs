//! Redis-backed side-cache for serving-path responses

use crate::error::{AppError, Result};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Cache key for the upstream batch listing
pub const BATCH_LIST_KEY: &str = "weather:batches";

/// Cache key for the raw observations at one coordinate
pub fn weather_data_key(latitude: f64, longitude: f64) -> String {
    format!("weather:data:{latitude}:{longitude}")
}

/// Cache key for the aggregate summary at one coordinate
pub fn weather_summary_key(latitude: f64, longitude: f64) -> String {
    format!("weather:summary:{latitude}:{longitude}")
}

/// Key/value store of JSON blobs with per-entry expiry.
///
/// This is a side-cache: a miss, a decode failure, or a redis error all
/// degrade to "not cached" so the read path never fails because of it.
#[derive(Clone)]
pub struct CacheGateway {
    conn: MultiplexedConnection,
    default_ttl: Duration,
}

impl CacheGateway {
    /// Connect to redis.
    pub async fn connect(redis_url: &str, default_ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::Cache(format!("redis connection failed: {e}")))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Cache(format!("redis connection failed: {e}")))?;

        info!(ttl_secs = default_ttl.as_secs(), "cache gateway connected");
        Ok(Self { conn, default_ttl })
    }

    /// Fetch and decode a cached value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = key, error = %e, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = key, error = %e, "cache read failed");
                None
            }
        }
    }

    /// Store a value with the given TTL, or the gateway default when None.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = key, error = %e, "failed to encode cache entry");
                return;
            }
        };

        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, raw, ttl.as_secs()).await {
            warn!(key = key, error = %e, "cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(weather_data_key(1.5, -2.25), "weather:data:1.5:-2.25");
        assert_eq!(weather_summary_key(40.7, -74.0), "weather:summary:40.7:-74");
        assert_eq!(BATCH_LIST_KEY, "weather:batches");
    }
}
