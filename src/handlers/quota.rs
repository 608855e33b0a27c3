//! Profile and quota endpoints.
//!
//! The quota gate is read-only (`GET .../quota`); the authoritative check
//! lives in the atomic conditional decrement behind `consume`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{PlanCatalog, UserBillingProfile};
use crate::services::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: String,
    pub plan: String,
    pub plan_name: String,
    pub quota_remaining: i64,
    pub quota_allowance: i64,
    pub can_consume: bool,
    pub subscription_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_renews_at: Option<String>,
}

impl From<UserBillingProfile> for ProfileResponse {
    fn from(profile: UserBillingProfile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            plan: profile.plan_id.as_str().to_string(),
            plan_name: PlanCatalog::display_name_for(profile.plan_id).to_string(),
            quota_remaining: profile.quota_remaining,
            quota_allowance: profile.quota_allowance,
            can_consume: profile.can_consume(),
            subscription_status: profile.subscription_status.as_str().to_string(),
            cycle_renews_at: profile
                .cycle_renews_at
                .and_then(|at| at.try_to_rfc3339_string().ok()),
        }
    }
}

/// Create a billing profile with free-plan defaults. Called once at account
/// creation; repeating the call returns the stored profile unchanged.
pub async fn create_profile(
    State(state): State<AppState>,
    Json(payload): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<ProfileResponse>), AppError> {
    if payload.user_id.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "user_id must not be empty"
        )));
    }

    let profile = state.repository.create_profile(&payload.user_id).await?;

    tracing::info!(user_id = %profile.user_id, "Billing profile created");

    Ok((StatusCode::CREATED, Json(profile.into())))
}

/// Quota gate and "analyses remaining" indicator. No side effects.
pub async fn quota_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = state
        .repository
        .get_profile(&user_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("no billing profile for user '{}'", user_id))
        })?;

    Ok(Json(profile.into()))
}

/// Consume one unit of quota for a successful analysis. Exactly-once under
/// concurrent callers; `QuotaExhausted` surfaces as 402 with
/// `code: "quota_exhausted"` so the caller can show the upgrade prompt.
pub async fn consume_quota(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ProfileResponse>, AppError> {
    match state.repository.consume_quota(&user_id).await {
        Ok(profile) => {
            metrics::record_consumption(profile.plan_id.as_str());
            tracing::info!(
                user_id = %user_id,
                quota_remaining = profile.quota_remaining,
                "Analysis quota consumed"
            );
            Ok(Json(profile.into()))
        }
        Err(AppError::QuotaExhausted) => {
            if let Ok(Some(profile)) = state.repository.get_profile(&user_id).await {
                metrics::record_exhaustion(profile.plan_id.as_str());
            }
            tracing::info!(user_id = %user_id, "Consumption rejected, quota exhausted");
            Err(AppError::QuotaExhausted)
        }
        Err(err) => Err(err),
    }
}
