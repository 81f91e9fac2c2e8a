//! Weather read endpoints, cache-first

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cache;
use crate::error::{AppError, Result};
use crate::models::{ObservationRecord, WeatherSummary};
use crate::state::AppState;

/// One observation as served to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherDataPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub forecast_time: chrono::DateTime<chrono::Utc>,
    pub temperature: Option<f64>,
    pub precipitation_rate: Option<f64>,
    pub humidity: Option<f64>,
}

impl From<ObservationRecord> for WeatherDataPoint {
    fn from(record: ObservationRecord) -> Self {
        Self {
            latitude: record.latitude,
            longitude: record.longitude,
            forecast_time: record.forecast_time,
            temperature: record.temperature,
            precipitation_rate: record.precipitation_rate,
            humidity: record.humidity,
        }
    }
}

/// GET /weather/data?latitude=&longitude=
///
/// Returns every stored observation at the coordinate, oldest forecast
/// first. Missing or invalid coordinates are a 400.
pub async fn get_weather_data(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<WeatherDataPoint>>> {
    let (latitude, longitude) = parse_coords(&params)?;

    let key = cache::weather_data_key(latitude, longitude);
    if let Some(cache) = &state.cache {
        if let Some(hit) = cache.get_json::<Vec<WeatherDataPoint>>(&key).await {
            return Ok(Json(hit));
        }
    }

    let rows = state.db.observations_at(latitude, longitude).await?;
    let points: Vec<WeatherDataPoint> = rows.into_iter().map(WeatherDataPoint::from).collect();

    if let Some(cache) = &state.cache {
        cache.set_json(&key, &points, None).await;
    }

    Ok(Json(points))
}

/// GET /weather/summarize?latitude=&longitude=
///
/// Max/min/avg of each measure at the coordinate; all values are null when
/// nothing is stored there.
pub async fn summarize_weather(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<WeatherSummary>> {
    let (latitude, longitude) = parse_coords(&params)?;

    let key = cache::weather_summary_key(latitude, longitude);
    if let Some(cache) = &state.cache {
        if let Some(hit) = cache.get_json::<WeatherSummary>(&key).await {
            return Ok(Json(hit));
        }
    }

    let summary = state.db.summarize_at(latitude, longitude).await?;

    if let Some(cache) = &state.cache {
        cache.set_json(&key, &summary, None).await;
    }

    Ok(Json(summary))
}

fn parse_coords(params: &HashMap<String, String>) -> Result<(f64, f64)> {
    Ok((
        parse_coord(params, "latitude")?,
        parse_coord(params, "longitude")?,
    ))
}

fn parse_coord(params: &HashMap<String, String>, name: &str) -> Result<f64> {
    let raw = params
        .get(name)
        .ok_or_else(|| AppError::InvalidRequest(format!("missing query parameter '{name}'")))?;

    let value: f64 = raw
        .parse()
        .map_err(|_| AppError::InvalidRequest(format!("invalid value for '{name}'")))?;

    if !value.is_finite() {
        return Err(AppError::InvalidRequest(format!(
            "invalid value for '{name}'"
        )));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn valid_coordinates_parse() {
        let coords =
            parse_coords(&params(&[("latitude", "40.7"), ("longitude", "-74.0")])).unwrap();
        assert_eq!(coords, (40.7, -74.0));
    }

    #[test]
    fn missing_coordinate_is_invalid_request() {
        let err = parse_coords(&params(&[("latitude", "40.7")])).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn non_numeric_coordinate_is_invalid_request() {
        let err =
            parse_coords(&params(&[("latitude", "north"), ("longitude", "-74.0")])).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn non_finite_coordinate_is_invalid_request() {
        let err =
            parse_coords(&params(&[("latitude", "NaN"), ("longitude", "-74.0")])).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }
}
