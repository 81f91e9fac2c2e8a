//! Database access layer with SQLx and PostgreSQL

use crate::error::{AppError, Result};
use crate::models::{
    BatchDescriptor, BatchMetadata, BatchStatus, MeasureSummary, ObservationRecord, WeatherSummary,
};
use crate::retry::{with_retry, RetryPolicy};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

/// Schema bootstrap, applied at startup. Index choices serve the read API
/// (coordinate lookups) and the retention sweep's hot query on ACTIVE rows.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS batch_metadata (
        batch_id TEXT PRIMARY KEY,
        forecast_time TIMESTAMPTZ NOT NULL,
        number_of_rows INTEGER NOT NULL DEFAULT 0,
        start_ingest_time TIMESTAMPTZ NOT NULL,
        end_ingest_time TIMESTAMPTZ,
        status TEXT NOT NULL,
        retained BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS weather_data (
        id BIGSERIAL PRIMARY KEY,
        batch_id TEXT NOT NULL,
        latitude DOUBLE PRECISION NOT NULL,
        longitude DOUBLE PRECISION NOT NULL,
        forecast_time TIMESTAMPTZ NOT NULL,
        temperature DOUBLE PRECISION,
        precipitation_rate DOUBLE PRECISION,
        humidity DOUBLE PRECISION
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_weather_lat_lon_time ON weather_data (latitude, longitude, forecast_time)",
    "CREATE INDEX IF NOT EXISTS ix_weather_batch_id ON weather_data (batch_id)",
    "CREATE INDEX IF NOT EXISTS ix_batch_active ON batch_metadata (status) WHERE status = 'ACTIVE'",
];

/// Database connection pool and operations
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    retry: RetryPolicy,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(connection_string)
            .await
            .map_err(|e| AppError::DatabaseUnavailable(format!("failed to connect: {e}")))?;

        info!("database connection pool established");
        Ok(Self {
            pool,
            retry: RetryPolicy::default(),
        })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema DDL.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("database schema ready");
        Ok(())
    }

    /// Look up batch metadata by its natural key.
    pub async fn find_batch(&self, batch_id: &str) -> Result<Option<BatchMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT batch_id, forecast_time, number_of_rows, start_ingest_time,
                   end_ingest_time, status, retained
            FROM batch_metadata
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(metadata_from_row))
    }

    /// Create the RUNNING metadata row that marks an ingestion in flight.
    /// Committed immediately so the batch is visible to concurrent readers.
    pub async fn insert_batch_running(
        &self,
        batch: &BatchDescriptor,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batch_metadata
                (batch_id, forecast_time, number_of_rows, start_ingest_time, status, retained)
            VALUES ($1, $2, 0, $3, $4, TRUE)
            "#,
        )
        .bind(&batch.batch_id)
        .bind(batch.forecast_time)
        .bind(started_at)
        .bind(BatchStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flip a batch to ACTIVE, recording the true inserted row count and
    /// the completion time.
    pub async fn complete_batch(
        &self,
        batch_id: &str,
        number_of_rows: i32,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE batch_metadata
            SET status = $1, number_of_rows = $2, end_ingest_time = $3
            WHERE batch_id = $4
            "#,
        )
        .bind(BatchStatus::Active.as_str())
        .bind(number_of_rows)
        .bind(ended_at)
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a batch FAILED and drop any partially inserted observations,
    /// in one transaction. The metadata row survives as the audit record.
    pub async fn fail_batch(&self, batch_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM weather_data WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE batch_metadata SET status = $1 WHERE batch_id = $2")
            .bind(BatchStatus::Failed.as_str())
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Bulk-insert observations in chunks. Each chunk is one transaction,
    /// committed independently, so a later chunk's failure never rolls back
    /// earlier chunks. Transient database errors retry the failing chunk
    /// under the policy; permanent errors abort without retry.
    pub async fn insert_observations(
        &self,
        rows: &[ObservationRecord],
        chunk_size: usize,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0u64;
        for (i, chunk) in rows.chunks(chunk_size.max(1)).enumerate() {
            with_retry(
                &self.retry,
                "insert_observations_chunk",
                || self.insert_chunk(chunk),
                AppError::is_transient_database,
            )
            .await?;

            inserted += chunk.len() as u64;
            debug!(chunk = i + 1, rows = chunk.len(), "observation chunk committed");
        }

        Ok(inserted)
    }

    async fn insert_chunk(&self, chunk: &[ObservationRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let mut builder = QueryBuilder::new(
            "INSERT INTO weather_data \
             (batch_id, latitude, longitude, forecast_time, temperature, precipitation_rate, humidity) ",
        );
        builder.push_values(chunk, |mut b, record| {
            b.push_bind(&record.batch_id)
                .push_bind(record.latitude)
                .push_bind(record.longitude)
                .push_bind(record.forecast_time)
                .push_bind(record.temperature)
                .push_bind(record.precipitation_rate)
                .push_bind(record.humidity);
        });
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Metadata rows in the given status, oldest forecast first; ties break
    /// on batch_id so retention ordering is deterministic.
    pub async fn list_batches_by_status(&self, status: BatchStatus) -> Result<Vec<BatchMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT batch_id, forecast_time, number_of_rows, start_ingest_time,
                   end_ingest_time, status, retained
            FROM batch_metadata
            WHERE status = $1
            ORDER BY forecast_time ASC, batch_id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(metadata_from_row).collect())
    }

    /// INACTIVE rows still inside the retained window, oldest first.
    pub async fn list_retained_inactive(&self) -> Result<Vec<BatchMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT batch_id, forecast_time, number_of_rows, start_ingest_time,
                   end_ingest_time, status, retained
            FROM batch_metadata
            WHERE status = $1 AND retained = TRUE
            ORDER BY forecast_time ASC, batch_id ASC
            "#,
        )
        .bind(BatchStatus::Inactive.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(metadata_from_row).collect())
    }

    /// Every metadata row, for the /batches endpoint.
    pub async fn list_all_batches(&self) -> Result<Vec<BatchMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT batch_id, forecast_time, number_of_rows, start_ingest_time,
                   end_ingest_time, status, retained
            FROM batch_metadata
            ORDER BY forecast_time ASC, batch_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(metadata_from_row).collect())
    }

    /// Displace batches from the active window: delete their observations
    /// and mark them INACTIVE, committed once for the whole sweep.
    pub async fn retire_batches(&self, batch_ids: &[String]) -> Result<()> {
        if batch_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM weather_data WHERE batch_id = ANY($1)")
            .bind(batch_ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE batch_metadata SET status = $1 WHERE batch_id = ANY($2)")
            .bind(BatchStatus::Inactive.as_str())
            .bind(batch_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Displace batches from the retained window. Their observations are
    /// already gone; only the retention flag flips.
    pub async fn unretain_batches(&self, batch_ids: &[String]) -> Result<()> {
        if batch_ids.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE batch_metadata SET retained = FALSE WHERE batch_id = ANY($1)")
            .bind(batch_ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete any observation rows still attached to non-retained batches.
    /// Safety net in case the sweeps raced or ran out of order.
    pub async fn cleanup_non_retained(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM weather_data
            WHERE batch_id IN (SELECT batch_id FROM batch_metadata WHERE retained = FALSE)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Every observation at a coordinate, oldest forecast first.
    pub async fn observations_at(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<ObservationRecord>> {
        let rows = sqlx::query_as::<_, ObservationRecord>(
            r#"
            SELECT batch_id, latitude, longitude, forecast_time,
                   temperature, precipitation_rate, humidity
            FROM weather_data
            WHERE latitude = $1 AND longitude = $2
            ORDER BY forecast_time ASC, id ASC
            "#,
        )
        .bind(latitude)
        .bind(longitude)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Max/min/avg of each measure at a coordinate. All-NULL aggregates
    /// (no matching rows) come back as None.
    pub async fn summarize_at(&self, latitude: f64, longitude: f64) -> Result<WeatherSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                MAX(temperature) AS max_temperature,
                MIN(temperature) AS min_temperature,
                AVG(temperature) AS avg_temperature,
                MAX(precipitation_rate) AS max_precipitation_rate,
                MIN(precipitation_rate) AS min_precipitation_rate,
                AVG(precipitation_rate) AS avg_precipitation_rate,
                MAX(humidity) AS max_humidity,
                MIN(humidity) AS min_humidity,
                AVG(humidity) AS avg_humidity
            FROM weather_data
            WHERE latitude = $1 AND longitude = $2
            "#,
        )
        .bind(latitude)
        .bind(longitude)
        .fetch_one(&self.pool)
        .await?;

        Ok(WeatherSummary {
            temperature: MeasureSummary {
                max: row.get("max_temperature"),
                min: row.get("min_temperature"),
                avg: row.get("avg_temperature"),
            },
            precipitation_rate: MeasureSummary {
                max: row.get("max_precipitation_rate"),
                min: row.get("min_precipitation_rate"),
                avg: row.get("avg_precipitation_rate"),
            },
            humidity: MeasureSummary {
                max: row.get("max_humidity"),
                min: row.get("min_humidity"),
                avg: row.get("avg_humidity"),
            },
        })
    }
}

/// Map a metadata row; the status column round-trips through its string form.
fn metadata_from_row(row: PgRow) -> BatchMetadata {
    BatchMetadata {
        batch_id: row.get("batch_id"),
        forecast_time: row.get("forecast_time"),
        number_of_rows: row.get("number_of_rows"),
        start_ingest_time: row.get("start_ingest_time"),
        end_ingest_time: row.get("end_ingest_time"),
        status: BatchStatus::from_db(row.get::<String, _>("status").as_str()),
        retained: row.get("retained"),
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn chunking_matches_commit_boundaries() {
        // 10,500 rows at chunk size 4,000 must commit as 4000 + 4000 + 2500.
        let rows: Vec<u32> = (0..10_500).collect();
        let sizes: Vec<usize> = rows.chunks(4_000).map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![4_000, 4_000, 2_500]);
    }
}
