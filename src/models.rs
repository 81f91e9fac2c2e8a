//! Core domain models for WeatherVault

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an ingested batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Metadata row created, data collection in flight
    Running,
    /// Fully ingested and inside the active window
    Active,
    /// Displaced from the active window; observations deleted
    Inactive,
    /// Ingestion broke partway; kept as an audit record
    Failed,
}

impl BatchStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "RUNNING",
            BatchStatus::Active => "ACTIVE",
            BatchStatus::Inactive => "INACTIVE",
            BatchStatus::Failed => "FAILED",
        }
    }

    /// Parse the database representation; unknown strings map to Failed.
    pub fn from_db(s: &str) -> BatchStatus {
        match s {
            "RUNNING" => BatchStatus::Running,
            "ACTIVE" => BatchStatus::Active,
            "INACTIVE" => BatchStatus::Inactive,
            _ => BatchStatus::Failed,
        }
    }
}

/// Wire shape of one entry in the upstream batches listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireBatch {
    pub batch_id: String,
    pub forecast_time: String,
}

/// One upstream-published batch, normalized: the id plus its parsed
/// forecast timestamp. The canonical descriptor shape everywhere past the
/// upstream client.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchDescriptor {
    pub batch_id: String,
    pub forecast_time: DateTime<Utc>,
}

impl BatchDescriptor {
    /// Normalize a wire entry. Returns None when the timestamp is not a
    /// usable ISO-8601 value.
    pub fn from_wire(raw: WireBatch) -> Option<Self> {
        let forecast_time = parse_forecast_time(&raw.forecast_time)?;
        Some(Self {
            batch_id: raw.batch_id,
            forecast_time,
        })
    }
}

/// Parse an upstream forecast timestamp. RFC 3339 first; the upstream also
/// publishes minute-precision values like `2024-01-01T00:00Z`.
pub fn parse_forecast_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    let trimmed = s.strip_suffix('Z').unwrap_or(s);
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Raw per-point record as returned inside a page's `data` array. Missing
/// optional measures stay None; they are never defaulted to a number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub precipitation_rate: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

/// Wire shape of one page of batch data.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchPage {
    #[serde(default)]
    pub data: Vec<RawObservation>,
    #[serde(default)]
    pub metadata: PageMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMetadata {
    pub total_pages: Option<u32>,
}

/// A single stored weather observation
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ObservationRecord {
    pub batch_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub forecast_time: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub precipitation_rate: Option<f64>,
    pub humidity: Option<f64>,
}

/// Batch metadata row: the audit trail of one ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: String,
    pub forecast_time: DateTime<Utc>,
    pub number_of_rows: i32,
    pub start_ingest_time: DateTime<Utc>,
    pub end_ingest_time: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub retained: bool,
}

/// Per-measure aggregate for the summarize endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureSummary {
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub avg: Option<f64>,
}

/// Aggregates over every observation at one coordinate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSummary {
    pub temperature: MeasureSummary,
    pub precipitation_rate: MeasureSummary,
    pub humidity: MeasureSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_timestamps() {
        let t = parse_forecast_time("2024-01-01T06:00:00Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap());

        let t = parse_forecast_time("2024-01-01T06:00:00+02:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap());
    }

    #[test]
    fn parses_minute_precision_timestamps() {
        let t = parse_forecast_time("2024-01-01T00:00Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert!(parse_forecast_time("tomorrow").is_none());
        assert!(parse_forecast_time("").is_none());
    }

    #[test]
    fn wire_batch_normalization() {
        let ok = BatchDescriptor::from_wire(WireBatch {
            batch_id: "b1".into(),
            forecast_time: "2024-01-01T00:00:00Z".into(),
        });
        assert_eq!(ok.unwrap().batch_id, "b1");

        let bad = BatchDescriptor::from_wire(WireBatch {
            batch_id: "b2".into(),
            forecast_time: "not a time".into(),
        });
        assert!(bad.is_none());
    }

    #[test]
    fn missing_measures_deserialize_to_none() {
        let raw: RawObservation =
            serde_json::from_str(r#"{"latitude": 1.0, "longitude": 2.0}"#).unwrap();
        assert_eq!(raw.latitude, 1.0);
        assert_eq!(raw.temperature, None);
        assert_eq!(raw.precipitation_rate, None);
        assert_eq!(raw.humidity, None);
    }

    #[test]
    fn page_metadata_defaults_when_absent() {
        let page: BatchPage = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert_eq!(page.metadata.total_pages, None);
    }

    #[test]
    fn status_round_trip() {
        for status in [
            BatchStatus::Running,
            BatchStatus::Active,
            BatchStatus::Inactive,
            BatchStatus::Failed,
        ] {
            assert_eq!(BatchStatus::from_db(status.as_str()), status);
        }
        assert_eq!(BatchStatus::from_db("???"), BatchStatus::Failed);
    }
}
