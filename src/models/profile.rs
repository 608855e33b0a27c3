//! Per-user billing profile.

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::models::plan::{PlanCatalog, PlanId};

/// Mirror of the provider's subscription lifecycle, reduced to the states
/// this service acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    None,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Map a provider status string. Unrecognized statuses map to
    /// `Canceled`: a status we cannot interpret never grants a paid
    /// allowance.
    pub fn from_provider(s: &str) -> Self {
        match s {
            "active" | "trialing" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            _ => SubscriptionStatus::Canceled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled)
    }
}

/// One document per user. All mutations go through atomic conditional
/// updates in `ProfileRepository`; nothing holds this across a round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBillingProfile {
    #[serde(rename = "_id")]
    pub user_id: String,
    /// Stripe customer id. Set once, never reassigned.
    pub billing_customer_ref: Option<String>,
    pub plan_id: PlanId,
    pub quota_remaining: i64,
    pub quota_allowance: i64,
    /// Stripe subscription id; null exactly when `plan_id` is `free`.
    pub subscription_ref: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub cycle_renews_at: Option<DateTime>,
    /// Provider timestamp of the last applied billing event. The
    /// set-if-newer guard compares against this, not `updated_at`, because
    /// quota consumption also advances `updated_at`.
    pub last_event_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl UserBillingProfile {
    /// Fresh profile on the free plan with a full allowance.
    pub fn new_free(user_id: &str) -> Self {
        let allowance = PlanCatalog::allowance_for(PlanId::Free);
        let now = DateTime::now();
        Self {
            user_id: user_id.to_string(),
            billing_customer_ref: None,
            plan_id: PlanId::Free,
            quota_remaining: allowance,
            quota_allowance: allowance,
            subscription_ref: None,
            subscription_status: SubscriptionStatus::None,
            cycle_renews_at: None,
            last_event_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Quota gate: true iff another analysis may proceed. Read-only; the
    /// authoritative check is the conditional decrement in the repository.
    pub fn can_consume(&self) -> bool {
        self.quota_remaining > 0
    }
}

/// Target profile state computed by the reconciler from a billing event.
/// Applying it twice is a no-op because every field is set, not adjusted.
#[derive(Debug, Clone)]
pub struct SubscriptionState {
    pub plan_id: PlanId,
    pub subscription_ref: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub cycle_renews_at: Option<DateTime>,
    /// Provider timestamp of the event this state was derived from.
    pub event_at: DateTime,
}
