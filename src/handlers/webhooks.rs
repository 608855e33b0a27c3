//! Stripe webhook endpoint.
//!
//! The signature is verified over the raw body before any field is read;
//! an unverifiable event is rejected and never processed. Store failures
//! return 5xx so the provider redelivers; stale, duplicate, and
//! unresolvable events are acknowledged so it does not.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;

use crate::error::AppError;
use crate::services::metrics;
use crate::services::stripe::{BillingEvent, SIGNATURE_HEADER};
use crate::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing {} header", SIGNATURE_HEADER);
            metrics::record_webhook_event("unknown", "invalid_signature");
            AppError::InvalidSignature
        })?;

    if let Err(err) =
        state
            .stripe
            .verify_webhook_signature(&body, signature, Utc::now().timestamp())
    {
        metrics::record_webhook_event("unknown", "invalid_signature");
        return Err(err);
    }

    let event = state.stripe.parse_webhook_event(&body)?;
    let event_type = event_label(&event);

    match state.reconciler.process(event).await {
        Ok(outcome) => {
            metrics::record_webhook_event(event_type, outcome.as_str());
            Ok(StatusCode::OK)
        }
        Err(AppError::UnresolvedUser(reason)) => {
            // Redelivery cannot make an unattributable event resolvable, so
            // acknowledge it; the log line is the operator's breadcrumb.
            tracing::error!(event_type = %event_type, reason = %reason, "Webhook event unresolved");
            metrics::record_webhook_event(event_type, "unresolved");
            Ok(StatusCode::OK)
        }
        Err(err) => {
            tracing::error!(event_type = %event_type, error = %err, "Webhook processing failed");
            metrics::record_webhook_event(event_type, "error");
            Err(err)
        }
    }
}

fn event_label(event: &BillingEvent) -> &'static str {
    match event {
        BillingEvent::CheckoutCompleted(_) => "checkout_completed",
        BillingEvent::SubscriptionChanged(_) => "subscription_changed",
        BillingEvent::Ignored { .. } => "ignored",
    }
}
