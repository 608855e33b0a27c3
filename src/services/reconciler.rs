//! Subscription event reconciler.
//!
//! Consumes verified billing events and applies the resulting plan/quota
//! state to the user's profile. Events arrive at-least-once and out of
//! order; the repository's set-if-newer guard makes stale and duplicate
//! deliveries harmless no-ops.

use mongodb::bson::DateTime;

use crate::config::StripeConfig;
use crate::error::AppError;
use crate::models::{PlanId, SubscriptionState, SubscriptionStatus};
use crate::services::repository::ProfileRepository;
use crate::services::stripe::{
    BillingEvent, CheckoutCompleted, StripeClient, SubscriptionChanged,
};

/// What processing an event amounted to. `Stale` covers both out-of-order
/// and duplicate deliveries; both are acknowledged, not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied { user_id: String, plan: PlanId },
    Stale { user_id: String },
    Ignored { event_type: String },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::Stale { .. } => "stale",
            ReconcileOutcome::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    repository: ProfileRepository,
    stripe: StripeClient,
    stripe_config: StripeConfig,
}

impl Reconciler {
    pub fn new(
        repository: ProfileRepository,
        stripe: StripeClient,
        stripe_config: StripeConfig,
    ) -> Self {
        Self {
            repository,
            stripe,
            stripe_config,
        }
    }

    /// Process one verified event. Safe to re-invoke from scratch: any
    /// failure leaves the profile untouched or fully updated, never partial.
    pub async fn process(&self, event: BillingEvent) -> Result<ReconcileOutcome, AppError> {
        match event {
            BillingEvent::CheckoutCompleted(event) => self.on_checkout_completed(event).await,
            BillingEvent::SubscriptionChanged(event) => self.on_subscription_changed(event).await,
            BillingEvent::Ignored { event_type } => {
                tracing::debug!(event_type = %event_type, "Ignoring unhandled event type");
                Ok(ReconcileOutcome::Ignored { event_type })
            }
        }
    }

    async fn on_checkout_completed(
        &self,
        event: CheckoutCompleted,
    ) -> Result<ReconcileOutcome, AppError> {
        let Some(subscription_ref) = event.subscription_ref else {
            // A completed session without a subscription (e.g. one-off
            // payment mode) carries nothing for us to reconcile.
            tracing::warn!(
                session_ref = %event.session_ref,
                "Checkout completed without subscription reference"
            );
            return Ok(ReconcileOutcome::Ignored {
                event_type: "checkout.session.completed".to_string(),
            });
        };

        let user_id = self
            .resolve_user(event.metadata.user_id.as_deref(), event.customer_ref.as_deref())
            .await?;

        if let Some(customer_ref) = &event.customer_ref {
            self.repository
                .set_customer_ref_if_unset(&user_id, customer_ref)
                .await?;
        }

        // The session event carries no price or period; hydrate from the
        // provider (boundary op, bounded timeout).
        let subscription = self.stripe.retrieve_subscription(&subscription_ref).await?;
        let state = build_state(
            &self.stripe_config,
            &subscription_ref,
            subscription.price_ref(),
            &subscription.status,
            Some(subscription.current_period_end),
            event.created,
        );

        self.apply(&user_id, state).await
    }

    async fn on_subscription_changed(
        &self,
        event: SubscriptionChanged,
    ) -> Result<ReconcileOutcome, AppError> {
        let user_id = self
            .resolve_user(event.metadata.user_id.as_deref(), event.customer_ref.as_deref())
            .await?;

        if let Some(customer_ref) = &event.customer_ref {
            self.repository
                .set_customer_ref_if_unset(&user_id, customer_ref)
                .await?;
        }

        let state = build_state(
            &self.stripe_config,
            &event.subscription_ref,
            event.price_ref.as_deref(),
            &event.status,
            event.current_period_end,
            event.created,
        );

        self.apply(&user_id, state).await
    }

    async fn apply(
        &self,
        user_id: &str,
        state: SubscriptionState,
    ) -> Result<ReconcileOutcome, AppError> {
        let plan = state.plan_id;
        let applied = self
            .repository
            .apply_subscription_state(user_id, &state)
            .await?;

        if applied {
            tracing::info!(
                user_id = %user_id,
                plan = %plan.as_str(),
                status = %state.subscription_status.as_str(),
                "Subscription state applied"
            );
            Ok(ReconcileOutcome::Applied {
                user_id: user_id.to_string(),
                plan,
            })
        } else {
            tracing::info!(
                user_id = %user_id,
                "Stale or duplicate event discarded"
            );
            Ok(ReconcileOutcome::Stale {
                user_id: user_id.to_string(),
            })
        }
    }

    /// Resolve the target user: metadata preferred, customer-ref lookup as
    /// fallback. Never guesses; disagreement or no match fails with
    /// `UnresolvedUser`.
    async fn resolve_user(
        &self,
        metadata_user_id: Option<&str>,
        customer_ref: Option<&str>,
    ) -> Result<String, AppError> {
        let by_metadata = match metadata_user_id {
            Some(user_id) => self
                .repository
                .get_profile(user_id)
                .await?
                .map(|profile| profile.user_id),
            None => None,
        };
        let by_customer = match customer_ref {
            Some(customer) => self
                .repository
                .find_by_customer_ref(customer)
                .await?
                .map(|profile| profile.user_id),
            None => None,
        };
        resolve_target_user(by_metadata, by_customer)
    }
}

/// Pure resolution rule over the two lookups. Both present but pointing at
/// different users is treated as unresolvable: guessing is unsafe for a
/// billing system.
pub(crate) fn resolve_target_user(
    by_metadata: Option<String>,
    by_customer: Option<String>,
) -> Result<String, AppError> {
    match (by_metadata, by_customer) {
        (Some(meta), Some(customer)) if meta != customer => Err(AppError::UnresolvedUser(
            format!("metadata user '{}' disagrees with customer match '{}'", meta, customer),
        )),
        (Some(meta), _) => Ok(meta),
        (None, Some(customer)) => Ok(customer),
        (None, None) => Err(AppError::UnresolvedUser(
            "event carries no user metadata and no known customer reference".to_string(),
        )),
    }
}

/// Translate a raw event into the target profile state.
///
/// An unrecognized price reference resolves to `free`: an unknown price must
/// never silently grant a paid allowance. A terminal status downgrades to
/// `free` with no subscription reference, preserving the
/// `free ⇔ no subscription` invariant.
pub(crate) fn build_state(
    config: &StripeConfig,
    subscription_ref: &str,
    price_ref: Option<&str>,
    provider_status: &str,
    current_period_end: Option<i64>,
    event_created: i64,
) -> SubscriptionState {
    let event_at = DateTime::from_millis(event_created * 1000);
    let status = SubscriptionStatus::from_provider(provider_status);

    if status.is_terminal() {
        return SubscriptionState {
            plan_id: PlanId::Free,
            subscription_ref: None,
            subscription_status: SubscriptionStatus::Canceled,
            cycle_renews_at: None,
            event_at,
        };
    }

    let plan_id = match price_ref.and_then(|price| config.plan_for_price(price)) {
        Some(plan) => plan,
        None => {
            tracing::warn!(
                subscription_ref = %subscription_ref,
                price_ref = ?price_ref,
                "Unrecognized price reference, falling back to free allowance"
            );
            PlanId::Free
        }
    };

    // The invariant ties the subscription reference to the plan, so a free
    // fallback also clears the reference.
    let subscription_ref = match plan_id {
        PlanId::Free => None,
        _ => Some(subscription_ref.to_string()),
    };

    SubscriptionState {
        plan_id,
        subscription_ref,
        subscription_status: status,
        cycle_renews_at: current_period_end.map(|end| DateTime::from_millis(end * 1000)),
        event_at,
    }
}
