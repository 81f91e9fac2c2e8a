//! Ingestion scheduler - drives periodic batch cycles

use crate::ingest::Ingestor;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Background task that runs one ingestion cycle per interval.
///
/// The first cycle starts immediately; afterwards the task sleeps for the
/// configured interval. Cycles never overlap (one task, sequential awaits)
/// and the stop signal is honored between cycles, never mid-batch.
pub async fn ingestion_task(
    ingestor: Ingestor,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "ingestion task started");

    loop {
        match ingestor.process_cycle().await {
            Ok(summary) => info!(
                discovered = summary.discovered,
                ingested = summary.ingested,
                skipped = summary.skipped,
                failed = summary.failed,
                "ingestion cycle complete"
            ),
            Err(e) => error!(error = %e, "ingestion cycle failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("ingestion task stopping");
                break;
            }
        }
    }
}
