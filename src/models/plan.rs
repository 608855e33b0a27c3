//! Plan catalog.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Subscription tier. Closed set; anything else is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Free,
    Basic,
    Premium,
}

impl PlanId {
    pub const ALL: [PlanId; 3] = [PlanId::Free, PlanId::Basic, PlanId::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Basic => "basic",
            PlanId::Premium => "premium",
        }
    }

    /// Parse a plan identifier. Unknown identifiers are an error, never a
    /// silent default; the free fallback for unrecognized *price references*
    /// lives in the reconciler, not here.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "free" => Ok(PlanId::Free),
            "basic" => Ok(PlanId::Basic),
            "premium" => Ok(PlanId::Premium),
            other => Err(AppError::UnknownPlan(other.to_string())),
        }
    }
}

/// Static plan catalog: the source of truth for per-cycle allowances.
/// Profiles persist a copy of the allowance, but resets recompute from here
/// so catalog changes take effect on the next cycle.
pub struct PlanCatalog;

impl PlanCatalog {
    /// Analyses included per billing cycle.
    pub fn allowance_for(plan: PlanId) -> i64 {
        match plan {
            PlanId::Free => 3,
            PlanId::Basic => 30,
            PlanId::Premium => 200,
        }
    }

    pub fn display_name_for(plan: PlanId) -> &'static str {
        match plan {
            PlanId::Free => "Free",
            PlanId::Basic => "Basic",
            PlanId::Premium => "Premium",
        }
    }

    /// Monthly price in the smallest currency unit (cents). Display only;
    /// the amount actually charged is whatever the Stripe price says.
    pub fn price_cents_for(plan: PlanId) -> i64 {
        match plan {
            PlanId::Free => 0,
            PlanId::Basic => 499,
            PlanId::Premium => 999,
        }
    }
}
