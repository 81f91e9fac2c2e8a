//! Three-generation retention over ingested batches

use crate::db::Database;
use crate::error::Result;
use crate::models::{BatchMetadata, BatchStatus};
use std::sync::Arc;
use tracing::{debug, info};

/// How many generations each window keeps.
pub const RETAIN_GENERATIONS: usize = 3;

/// Enforces the retention policy after each ingestion cycle: at most three
/// ACTIVE batches, at most three retained INACTIVE batches, and no
/// observation rows left behind for anything displaced further.
pub struct RetentionManager {
    db: Arc<Database>,
}

impl RetentionManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Run all three sweeps in order.
    pub async fn run(&self) -> Result<()> {
        self.sweep_active_window().await?;
        self.sweep_retained_window().await?;
        self.cleanup_non_retained().await?;
        Ok(())
    }

    /// Displace ACTIVE batches beyond the newest three: their observations
    /// are deleted and the rows flip to INACTIVE, committed once.
    async fn sweep_active_window(&self) -> Result<()> {
        let active = self.db.list_batches_by_status(BatchStatus::Active).await?;
        let evict = evictable(&active, RETAIN_GENERATIONS);
        if evict.is_empty() {
            debug!(active = active.len(), "active window within bounds");
            return Ok(());
        }

        info!(count = evict.len(), "retiring batches displaced from the active window");
        self.db.retire_batches(&evict).await
    }

    /// Displace INACTIVE batches beyond the newest three from the retained
    /// window. Metadata survives as the audit trail; only the flag flips.
    async fn sweep_retained_window(&self) -> Result<()> {
        let inactive = self.db.list_retained_inactive().await?;
        let evict = evictable(&inactive, RETAIN_GENERATIONS);
        if evict.is_empty() {
            return Ok(());
        }

        info!(count = evict.len(), "dropping batches from the retained window");
        self.db.unretain_batches(&evict).await
    }

    /// Delete observation rows still attached to non-retained batches.
    async fn cleanup_non_retained(&self) -> Result<()> {
        let deleted = self.db.cleanup_non_retained().await?;
        if deleted > 0 {
            info!(deleted = deleted, "removed observations for non-retained batches");
        }
        Ok(())
    }
}

/// The batch ids displaced from a window of `keep` generations: everything
/// but the `keep` newest by forecast_time, oldest first. Ties break on
/// batch_id so the result is deterministic.
pub fn evictable(batches: &[BatchMetadata], keep: usize) -> Vec<String> {
    if batches.len() <= keep {
        return Vec::new();
    }

    let mut sorted: Vec<&BatchMetadata> = batches.iter().collect();
    sorted.sort_by(|a, b| {
        a.forecast_time
            .cmp(&b.forecast_time)
            .then_with(|| a.batch_id.cmp(&b.batch_id))
    });

    sorted[..batches.len() - keep]
        .iter()
        .map(|b| b.batch_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn batch(id: &str, day: u32) -> BatchMetadata {
        BatchMetadata {
            batch_id: id.to_string(),
            forecast_time: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            number_of_rows: 0,
            start_ingest_time: Utc.with_ymd_and_hms(2024, 1, day, 1, 0, 0).unwrap(),
            end_ingest_time: None,
            status: BatchStatus::Active,
            retained: true,
        }
    }

    #[test]
    fn window_within_bounds_evicts_nothing() {
        assert!(evictable(&[], RETAIN_GENERATIONS).is_empty());

        let batches = vec![batch("b1", 1), batch("b2", 2), batch("b3", 3)];
        assert!(evictable(&batches, RETAIN_GENERATIONS).is_empty());
    }

    #[test]
    fn evicts_the_oldest_beyond_the_window() {
        let batches = vec![batch("b2", 2), batch("b4", 4), batch("b1", 1), batch("b3", 3)];
        assert_eq!(evictable(&batches, RETAIN_GENERATIONS), vec!["b1"]);
    }

    #[test]
    fn evicts_oldest_first_when_several_are_displaced() {
        let batches = vec![
            batch("b5", 5),
            batch("b1", 1),
            batch("b3", 3),
            batch("b2", 2),
            batch("b4", 4),
        ];
        assert_eq!(evictable(&batches, RETAIN_GENERATIONS), vec!["b1", "b2"]);
    }

    #[test]
    fn equal_forecast_times_break_ties_on_batch_id() {
        let batches = vec![batch("b", 1), batch("a", 1), batch("d", 1), batch("c", 1)];
        assert_eq!(evictable(&batches, RETAIN_GENERATIONS), vec!["a"]);
    }
}
