//! Scheduled quota reset.
//!
//! Invoked by an external scheduler once per cycle. The repository carries
//! its own double-fire guard (profiles mid-cycle are skipped), so an
//! accidental second firing refills nothing.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::AppError;
use crate::services::metrics;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub updated: u64,
}

pub async fn reset_quotas(
    State(state): State<AppState>,
) -> Result<Json<ResetResponse>, AppError> {
    let updated = state.repository.reset_quotas().await?;

    metrics::record_reset(updated);
    tracing::info!(updated, "Quota reset completed");

    Ok(Json(ResetResponse { updated }))
}
