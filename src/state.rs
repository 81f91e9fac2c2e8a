//! Application state shared across handlers

use crate::cache::CacheGateway;
use crate::db::Database;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: Arc<Database>,
    /// Side-cache for read responses (None when redis is unavailable)
    pub cache: Option<CacheGateway>,
}

impl AppState {
    pub fn new(db: Arc<Database>, cache: Option<CacheGateway>) -> Self {
        Self { db, cache }
    }
}
