//! Checkout initiation.
//!
//! Creates or reuses the billing customer, starts a hosted checkout session
//! for the target plan, and returns the redirect URL. The profile's plan and
//! quota are never touched here; that only happens once the reconciler
//! confirms the subscription.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::PlanId;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub email: String,
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_ref: String,
    pub redirect_url: String,
}

pub async fn start_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    if payload.user_id.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "user_id and email must not be empty"
        )));
    }

    let plan = PlanId::parse(&payload.plan)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("unknown plan '{}'", payload.plan)))?;
    if plan == PlanId::Free {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "the free plan has nothing to purchase"
        )));
    }

    let price_ref = state
        .config
        .stripe
        .price_for(plan)
        .ok_or_else(|| {
            tracing::error!(plan = %plan.as_str(), "No Stripe price configured for plan");
            AppError::PlanNotConfigured(plan.as_str().to_string())
        })?
        .to_string();

    tracing::info!(
        user_id = %payload.user_id,
        plan = %plan.as_str(),
        "Starting checkout"
    );

    // Profiles are normally created at signup; tolerate a missing one.
    let profile = match state.repository.get_profile(&payload.user_id).await? {
        Some(profile) => profile,
        None => state.repository.create_profile(&payload.user_id).await?,
    };

    // Check-then-create for the customer record. The create is persisted
    // immediately and the stored reference always wins, so a retry or a
    // racing request reuses the first customer instead of minting another.
    let customer_ref = match profile.billing_customer_ref {
        Some(customer_ref) => customer_ref,
        None => {
            let customer = state
                .stripe
                .create_customer(&payload.email, &payload.user_id)
                .await?;
            state
                .repository
                .set_customer_ref_if_unset(&payload.user_id, &customer.id)
                .await?
        }
    };

    let session = state
        .stripe
        .create_checkout_session(&customer_ref, &price_ref, &payload.user_id, plan)
        .await?;

    let redirect_url = session.url.ok_or_else(|| {
        AppError::PaymentProvider(anyhow::anyhow!("checkout session has no redirect URL"))
    })?;

    tracing::info!(
        user_id = %payload.user_id,
        session_ref = %session.id,
        "Checkout session created"
    );

    Ok(Json(CheckoutResponse {
        session_ref: session.id,
        redirect_url,
    }))
}
