//! Batch metadata listing endpoint

use axum::{extract::State, Json};

use crate::error::Result;
use crate::models::BatchMetadata;
use crate::state::AppState;

/// GET /batches
///
/// Returns every batch metadata row, oldest forecast first — including
/// INACTIVE, FAILED, and non-retained batches (the audit trail).
pub async fn list_batches(State(state): State<AppState>) -> Result<Json<Vec<BatchMetadata>>> {
    let batches = state.db.list_all_batches().await?;
    Ok(Json(batches))
}
