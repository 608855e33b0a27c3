//! MongoDB-backed profile store.
//!
//! Every mutation of a `UserBillingProfile` is a single atomic conditional
//! update: decrement-if-positive for quota consumption, set-if-unset for the
//! customer reference, set-if-newer for subscription state. No caller ever
//! holds a lock or splits a read-modify-write across round trips.

use anyhow::anyhow;
use mongodb::bson::{doc, Bson, DateTime};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};

use crate::error::AppError;
use crate::models::{PlanCatalog, PlanId, SubscriptionState, UserBillingProfile};

const PROFILE_COLLECTION: &str = "billing_profiles";

/// Length of a quota cycle stamped onto profiles refilled by the reset job.
const CYCLE_DAYS: i64 = 30;

#[derive(Clone)]
pub struct ProfileRepository {
    profiles: Collection<UserBillingProfile>,
}

impl ProfileRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            profiles: db.collection(PROFILE_COLLECTION),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), AppError> {
        // Webhook events that carry no user metadata are resolved through
        // the customer reference.
        let customer_ref_index = IndexModel::builder()
            .keys(doc! { "billing_customer_ref": 1 })
            .options(
                IndexOptions::builder()
                    .name("billing_customer_ref_idx".to_string())
                    .build(),
            )
            .build();

        // The reset job updates per plan.
        let plan_index = IndexModel::builder()
            .keys(doc! { "plan_id": 1, "cycle_renews_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("plan_cycle_idx".to_string())
                    .build(),
            )
            .build();

        self.profiles
            .create_indexes([customer_ref_index, plan_index], None)
            .await?;

        tracing::info!("Billing profile indexes initialized");
        Ok(())
    }

    /// Create a profile with free-plan defaults. Idempotent: a concurrent
    /// or repeated create returns the already-stored profile.
    pub async fn create_profile(&self, user_id: &str) -> Result<UserBillingProfile, AppError> {
        let profile = UserBillingProfile::new_free(user_id);
        match self.profiles.insert_one(&profile, None).await {
            Ok(_) => Ok(profile),
            Err(err) if is_duplicate_key(&err) => self
                .get_profile(user_id)
                .await?
                .ok_or_else(|| AppError::Internal(anyhow!("profile vanished after duplicate key"))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserBillingProfile>, AppError> {
        let profile = self.profiles.find_one(doc! { "_id": user_id }, None).await?;
        Ok(profile)
    }

    pub async fn find_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<UserBillingProfile>, AppError> {
        let profile = self
            .profiles
            .find_one(doc! { "billing_customer_ref": customer_ref }, None)
            .await?;
        Ok(profile)
    }

    /// Atomic conditional decrement: consume one unit of quota only if any
    /// remains. Two racing callers observing `quota_remaining == 1` cannot
    /// both succeed; the filter re-checks inside the single update.
    pub async fn consume_quota(&self, user_id: &str) -> Result<UserBillingProfile, AppError> {
        let filter = doc! { "_id": user_id, "quota_remaining": { "$gt": 0 } };
        let update = doc! {
            "$inc": { "quota_remaining": -1 },
            "$set": { "updated_at": DateTime::now() },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        match self
            .profiles
            .find_one_and_update(filter, update, options)
            .await?
        {
            Some(profile) => Ok(profile),
            // Distinguish "no quota left" from "no such user".
            None => match self.get_profile(user_id).await? {
                Some(_) => Err(AppError::QuotaExhausted),
                None => Err(AppError::NotFound(anyhow!(
                    "no billing profile for user '{}'",
                    user_id
                ))),
            },
        }
    }

    /// Persist the billing customer reference if the profile has none yet,
    /// and return whichever reference is stored afterwards. The reference is
    /// immutable once set, so a retry that raced a concurrent checkout gets
    /// the winner's value back and reuses it.
    pub async fn set_customer_ref_if_unset(
        &self,
        user_id: &str,
        customer_ref: &str,
    ) -> Result<String, AppError> {
        let filter = doc! { "_id": user_id, "billing_customer_ref": Bson::Null };
        let update = doc! {
            "$set": {
                "billing_customer_ref": customer_ref,
                "updated_at": DateTime::now(),
            },
        };
        self.profiles.update_one(filter, update, None).await?;

        let profile = self
            .get_profile(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("no billing profile for user '{}'", user_id)))?;
        profile
            .billing_customer_ref
            .ok_or_else(|| AppError::Internal(anyhow!("customer ref missing after set")))
    }

    /// Apply reconciled subscription state with last-writer-wins semantics.
    ///
    /// The filter discards any event whose provider timestamp is not newer
    /// than the last applied one, which covers both out-of-order delivery
    /// and exact redelivery. Returns whether the state was applied.
    pub async fn apply_subscription_state(
        &self,
        user_id: &str,
        state: &SubscriptionState,
    ) -> Result<bool, AppError> {
        let filter = doc! {
            "_id": user_id,
            "$or": [
                { "last_event_at": Bson::Null },
                { "last_event_at": { "$lt": state.event_at } },
            ],
        };

        let allowance = PlanCatalog::allowance_for(state.plan_id);
        let subscription_ref = match &state.subscription_ref {
            Some(sub_ref) => Bson::String(sub_ref.clone()),
            None => Bson::Null,
        };
        let cycle_renews_at = match state.cycle_renews_at {
            Some(at) => Bson::DateTime(at),
            None => Bson::Null,
        };

        // A plan change resets quota to the new plan's full allowance; the
        // whole state is set, never incremented, so re-applying is a no-op.
        let update = doc! {
            "$set": {
                "plan_id": state.plan_id.as_str(),
                "quota_allowance": allowance,
                "quota_remaining": allowance,
                "subscription_ref": subscription_ref,
                "subscription_status": state.subscription_status.as_str(),
                "cycle_renews_at": cycle_renews_at,
                "last_event_at": state.event_at,
                "updated_at": DateTime::now(),
            },
        };

        let result = self.profiles.update_one(filter, update, None).await?;
        Ok(result.matched_count > 0)
    }

    /// Refill quotas for every profile whose cycle has lapsed, recomputing
    /// the allowance from the catalog rather than the stored copy.
    ///
    /// Double-fire guard: profiles with `cycle_renews_at` still in the
    /// future are skipped, and refilled profiles are stamped one cycle
    /// ahead, so an immediate re-run updates nothing.
    pub async fn reset_quotas(&self) -> Result<u64, AppError> {
        let now = DateTime::now();
        let next_renewal = DateTime::from_millis(
            now.timestamp_millis() + CYCLE_DAYS * 24 * 60 * 60 * 1000,
        );

        let mut updated = 0u64;
        for plan in PlanId::ALL {
            let allowance = PlanCatalog::allowance_for(plan);
            let filter = doc! {
                "plan_id": plan.as_str(),
                "$or": [
                    { "cycle_renews_at": Bson::Null },
                    { "cycle_renews_at": { "$lte": now } },
                ],
            };
            let update = doc! {
                "$set": {
                    "quota_remaining": allowance,
                    "quota_allowance": allowance,
                    "cycle_renews_at": next_renewal,
                    "updated_at": now,
                },
            };
            let result = self.profiles.update_many(filter, update, None).await?;
            updated += result.modified_count;
        }

        Ok(updated)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}
