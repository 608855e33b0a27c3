use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

use crate::models::PlanId;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    /// Stripe price id backing the `basic` plan. Empty means not configured.
    pub price_basic: String,
    /// Stripe price id backing the `premium` plan. Empty means not configured.
    pub price_premium: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    /// Outbound request timeout. Every provider call is bounded by this.
    pub timeout_secs: u64,
    /// Replay tolerance for the webhook signature timestamp.
    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    /// Price reference for a paid plan; `free` has no price by definition.
    pub fn price_for(&self, plan: PlanId) -> Option<&str> {
        let price = match plan {
            PlanId::Free => return None,
            PlanId::Basic => &self.price_basic,
            PlanId::Premium => &self.price_premium,
        };
        if price.is_empty() {
            None
        } else {
            Some(price)
        }
    }

    /// Inverse of the price configuration. Unknown price references return
    /// `None`; the reconciler decides what that falls back to.
    pub fn plan_for_price(&self, price_ref: &str) -> Option<PlanId> {
        if price_ref.is_empty() {
            return None;
        }
        if price_ref == self.price_basic {
            Some(PlanId::Basic)
        } else if price_ref == self.price_premium {
            Some(PlanId::Premium)
        } else {
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BILLING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BILLING_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let db_url = env::var("BILLING_DATABASE_URL").expect("BILLING_DATABASE_URL must be set");
        let db_name =
            env::var("BILLING_DATABASE_NAME").unwrap_or_else(|_| "billing_db".to_string());

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        let stripe_api_base_url = env::var("STRIPE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string());
        let price_basic = env::var("STRIPE_PRICE_BASIC").unwrap_or_default();
        let price_premium = env::var("STRIPE_PRICE_PREMIUM").unwrap_or_default();
        let checkout_success_url = env::var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| "https://app.ilyzlist.com/billing/success".to_string());
        let checkout_cancel_url = env::var("CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|_| "https://app.ilyzlist.com/billing/cancel".to_string());
        let timeout_secs = env::var("STRIPE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let webhook_tolerance_secs = env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            stripe: StripeConfig {
                secret_key: Secret::new(stripe_secret_key),
                webhook_secret: Secret::new(stripe_webhook_secret),
                api_base_url: stripe_api_base_url,
                price_basic,
                price_premium,
                checkout_success_url,
                checkout_cancel_url,
                timeout_secs,
                webhook_tolerance_secs,
            },
            service_name: "ilyzlist-billing".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe_config() -> StripeConfig {
        StripeConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            api_base_url: "https://api.stripe.com/v1".to_string(),
            price_basic: "price_basic_123".to_string(),
            price_premium: "price_premium_456".to_string(),
            checkout_success_url: "https://example.com/success".to_string(),
            checkout_cancel_url: "https://example.com/cancel".to_string(),
            timeout_secs: 10,
            webhook_tolerance_secs: 300,
        }
    }

    #[test]
    fn free_plan_has_no_price() {
        assert!(stripe_config().price_for(PlanId::Free).is_none());
    }

    #[test]
    fn paid_plans_resolve_to_configured_prices() {
        let config = stripe_config();
        assert_eq!(config.price_for(PlanId::Basic), Some("price_basic_123"));
        assert_eq!(config.price_for(PlanId::Premium), Some("price_premium_456"));
    }

    #[test]
    fn empty_price_means_not_configured() {
        let mut config = stripe_config();
        config.price_premium = String::new();
        assert!(config.price_for(PlanId::Premium).is_none());
    }

    #[test]
    fn price_translation_round_trips_and_rejects_unknown() {
        let config = stripe_config();
        assert_eq!(config.plan_for_price("price_basic_123"), Some(PlanId::Basic));
        assert_eq!(
            config.plan_for_price("price_premium_456"),
            Some(PlanId::Premium)
        );
        assert_eq!(config.plan_for_price("price_someone_elses"), None);
        assert_eq!(config.plan_for_price(""), None);
    }
}
