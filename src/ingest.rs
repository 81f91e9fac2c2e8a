//! Batch ingestion orchestrator

use crate::db::Database;
use crate::error::Result;
use crate::models::{BatchDescriptor, ObservationRecord, RawObservation};
use crate::retention::RetentionManager;
use crate::upstream::UpstreamClient;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one batch's trip through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A metadata row already existed; nothing was done.
    Skipped,
    /// Ingested to ACTIVE with this many observation rows.
    Ingested(u64),
}

/// Tallies for one full cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub discovered: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Drives the per-batch lifecycle: dedup check, RUNNING row, paginated
/// fetch, transform, chunked insert, status transition — then hands the
/// cycle to the retention sweeps.
pub struct Ingestor {
    db: Arc<Database>,
    upstream: UpstreamClient,
    retention: RetentionManager,
    chunk_size: usize,
}

impl Ingestor {
    pub fn new(
        db: Arc<Database>,
        upstream: UpstreamClient,
        retention: RetentionManager,
        chunk_size: usize,
    ) -> Self {
        Self {
            db,
            upstream,
            retention,
            chunk_size,
        }
    }

    /// Run one full cycle: list batches, ingest them oldest-first, then
    /// prune. A batch's failure never aborts the rest of the cycle.
    pub async fn process_cycle(&self) -> Result<CycleSummary> {
        let mut batches = self.upstream.list_batches().await;
        sort_for_ingest(&mut batches);

        let mut summary = CycleSummary {
            discovered: batches.len(),
            ..CycleSummary::default()
        };

        for batch in &batches {
            match self.ingest_batch(batch).await {
                Ok(IngestOutcome::Ingested(_)) => summary.ingested += 1,
                Ok(IngestOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(batch_id = %batch.batch_id, error = %e, "batch ingestion failed");
                }
            }
        }

        if let Err(e) = self.retention.run().await {
            error!(error = %e, "retention sweep failed");
        }

        Ok(summary)
    }

    /// Ingest a single batch.
    ///
    /// The batch id is the idempotency key: if a metadata row exists in any
    /// status — FAILED included — this is a no-op. An unseen batch gets a
    /// RUNNING row committed up front, then data collection; any error past
    /// that point marks the row FAILED and clears partial inserts.
    pub async fn ingest_batch(&self, batch: &BatchDescriptor) -> Result<IngestOutcome> {
        if self.db.find_batch(&batch.batch_id).await?.is_some() {
            debug!(batch_id = %batch.batch_id, "batch already known, skipping");
            return Ok(IngestOutcome::Skipped);
        }

        info!(batch_id = %batch.batch_id, "starting ingestion");
        self.db.insert_batch_running(batch, Utc::now()).await?;

        match self.collect_and_complete(batch).await {
            Ok(rows) => {
                info!(batch_id = %batch.batch_id, rows = rows, "batch ingested");
                Ok(IngestOutcome::Ingested(rows))
            }
            Err(e) => {
                if let Err(mark_err) = self.db.fail_batch(&batch.batch_id).await {
                    error!(
                        batch_id = %batch.batch_id,
                        error = %mark_err,
                        "failed to mark batch FAILED"
                    );
                }
                Err(e)
            }
        }
    }

    /// Steps 3–5 of the state machine: fetch, transform, insert, and flip
    /// the row to ACTIVE with the true inserted count.
    async fn collect_and_complete(&self, batch: &BatchDescriptor) -> Result<u64> {
        let total_pages = self.upstream.fetch_total_pages(&batch.batch_id).await;
        debug!(batch_id = %batch.batch_id, total_pages = total_pages, "fetching batch pages");

        let raw = self.upstream.fetch_batch_data(&batch.batch_id, total_pages).await;
        let rows = build_observations(batch, raw);

        let inserted = self.db.insert_observations(&rows, self.chunk_size).await?;
        self.db
            .complete_batch(&batch.batch_id, inserted as i32, Utc::now())
            .await?;

        Ok(inserted)
    }
}

/// Transform raw upstream records into observation rows for this batch.
/// Every row inherits the batch's forecast time; missing optional measures
/// stay None.
fn build_observations(
    batch: &BatchDescriptor,
    raw: Vec<RawObservation>,
) -> Vec<ObservationRecord> {
    raw.into_iter()
        .map(|record| ObservationRecord {
            batch_id: batch.batch_id.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            forecast_time: batch.forecast_time,
            temperature: record.temperature,
            precipitation_rate: record.precipitation_rate,
            humidity: record.humidity,
        })
        .collect()
}

/// Oldest forecast first, so retention always evicts the true oldest at the
/// end of the cycle; ties break on batch_id.
fn sort_for_ingest(batches: &mut [BatchDescriptor]) {
    batches.sort_by(|a, b| {
        a.forecast_time
            .cmp(&b.forecast_time)
            .then_with(|| a.batch_id.cmp(&b.batch_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn descriptor(id: &str, hour: u32) -> BatchDescriptor {
        BatchDescriptor {
            batch_id: id.to_string(),
            forecast_time: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn observations_inherit_the_batch_forecast_time() {
        let batch = descriptor("b1", 6);
        let raw = vec![RawObservation {
            latitude: 1.0,
            longitude: 2.0,
            temperature: Some(10.0),
            precipitation_rate: None,
            humidity: None,
        }];

        let rows = build_observations(&batch, raw);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch_id, "b1");
        assert_eq!(rows[0].forecast_time, batch.forecast_time);
        assert_eq!(rows[0].temperature, Some(10.0));
        assert_eq!(rows[0].precipitation_rate, None);
        assert_eq!(rows[0].humidity, None);
    }

    #[test]
    fn transform_preserves_every_record() {
        let batch = descriptor("b1", 0);
        let raw: Vec<RawObservation> = (0..50)
            .map(|i| RawObservation {
                latitude: i as f64,
                longitude: -(i as f64),
                temperature: None,
                precipitation_rate: Some(0.1),
                humidity: Some(55.0),
            })
            .collect();

        let rows = build_observations(&batch, raw);
        assert_eq!(rows.len(), 50);
        assert!(rows.iter().all(|r| r.temperature.is_none()));
        assert!(rows.iter().all(|r| r.batch_id == "b1"));
    }

    #[test]
    fn cycle_order_is_oldest_first() {
        let mut batches = vec![descriptor("b3", 12), descriptor("b1", 0), descriptor("b2", 6)];
        sort_for_ingest(&mut batches);

        let ids: Vec<&str> = batches.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2", "b3"]);
    }

    #[test]
    fn cycle_order_ties_break_on_batch_id() {
        let mut batches = vec![descriptor("z", 0), descriptor("a", 0), descriptor("m", 0)];
        sort_for_ingest(&mut batches);

        let ids: Vec<&str> = batches.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }
}
