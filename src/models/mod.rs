pub mod plan;
pub mod profile;

pub use plan::{PlanCatalog, PlanId};
pub use profile::{SubscriptionState, SubscriptionStatus, UserBillingProfile};
