//! Stripe billing provider client.
//!
//! Implements the three boundary operations the core needs (customer
//! creation, checkout session creation, subscription retrieval), plus
//! webhook signature verification and payload parsing into the tagged
//! event type the reconciler consumes.

use std::time::Duration;

use anyhow::anyhow;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;

use crate::config::StripeConfig;
use crate::error::AppError;
use crate::models::PlanId;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

/// Stripe customer record (only the fields we read).
#[derive(Debug, Deserialize)]
pub struct Customer {
    pub id: String,
}

/// Hosted checkout session.
#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Redirect URL for the user's browser; present on freshly created
    /// sessions.
    pub url: Option<String>,
}

/// Subscription as returned by `GET /subscriptions/{id}`.
#[derive(Debug, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub current_period_end: i64,
    #[serde(default)]
    pub customer: Option<String>,
    pub items: SubscriptionItems,
}

impl ProviderSubscription {
    pub fn price_ref(&self) -> Option<&str> {
        self.items
            .data
            .first()
            .map(|item| item.price.id.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionItems {
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionItem {
    pub price: PriceRef,
}

#[derive(Debug, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

/// Metadata stamped onto sessions and subscriptions at checkout initiation.
/// This is the only reliable way to attribute an asynchronous event back to
/// a user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
}

/// Billing events this service reconciles, validated and parsed at the
/// boundary before any business logic runs. Everything else is `Ignored`.
#[derive(Debug, Clone)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutCompleted),
    SubscriptionChanged(SubscriptionChanged),
    Ignored { event_type: String },
}

#[derive(Debug, Clone)]
pub struct CheckoutCompleted {
    pub event_id: String,
    /// Provider event timestamp (unix seconds).
    pub created: i64,
    pub session_ref: String,
    pub customer_ref: Option<String>,
    pub subscription_ref: Option<String>,
    pub metadata: EventMetadata,
}

#[derive(Debug, Clone)]
pub struct SubscriptionChanged {
    pub event_id: String,
    pub created: i64,
    pub subscription_ref: String,
    pub customer_ref: Option<String>,
    pub price_ref: Option<String>,
    pub status: String,
    pub current_period_end: Option<i64>,
    pub metadata: EventMetadata,
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    metadata: EventMetadata,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    #[serde(default)]
    customer: Option<String>,
    status: String,
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    items: Option<SubscriptionItems>,
    #[serde(default)]
    metadata: EventMetadata,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Create a billing customer tagged with our user id.
    pub async fn create_customer(
        &self,
        email: &str,
        user_id: &str,
    ) -> Result<Customer, AppError> {
        let params = [("email", email), ("metadata[user_id]", user_id)];
        self.post("/customers", &params).await
    }

    /// Create a subscription checkout session. Both the session and the
    /// eventual subscription carry `{user_id, plan}` metadata so the
    /// reconciler can attribute later events.
    pub async fn create_checkout_session(
        &self,
        customer_ref: &str,
        price_ref: &str,
        user_id: &str,
        plan: PlanId,
    ) -> Result<CheckoutSession, AppError> {
        let params = [
            ("mode", "subscription"),
            ("customer", customer_ref),
            ("line_items[0][price]", price_ref),
            ("line_items[0][quantity]", "1"),
            ("success_url", self.config.checkout_success_url.as_str()),
            ("cancel_url", self.config.checkout_cancel_url.as_str()),
            ("metadata[user_id]", user_id),
            ("metadata[plan]", plan.as_str()),
            ("subscription_data[metadata][user_id]", user_id),
            ("subscription_data[metadata][plan]", plan.as_str()),
        ];
        self.post("/checkout/sessions", &params).await
    }

    /// Fetch a subscription's current price, status and period end. Used to
    /// hydrate `checkout_completed` events, which do not carry them.
    pub async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ProviderSubscription, AppError> {
        let url = format!("{}/subscriptions/{}", self.config.api_base_url, subscription_ref);
        let response = self
            .client
            .get(&url)
            .basic_auth(self.config.secret_key.expose_secret(), Some(""))
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(anyhow!("subscription fetch failed: {}", e)))?;
        Self::decode(response).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, AppError> {
        if !self.is_configured() {
            return Err(AppError::PaymentProvider(anyhow!(
                "Stripe credentials not configured"
            )));
        }

        let url = format!("{}{}", self.config.api_base_url, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(self.config.secret_key.expose_secret(), Some(""))
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(anyhow!("request to {} failed: {}", path, e)))?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::PaymentProvider(anyhow!("failed to read response: {}", e)))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                AppError::PaymentProvider(anyhow!("unexpected response shape: {}", e))
            })
        } else {
            let detail = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| {
                    format!(
                        "{}: {}",
                        b.error.error_type.unwrap_or_else(|| "api_error".to_string()),
                        b.error.message.unwrap_or_default()
                    )
                })
                .unwrap_or(body);
            tracing::error!(status = %status, detail = %detail, "Stripe API call failed");
            Err(AppError::PaymentProvider(anyhow!(
                "Stripe returned {}: {}",
                status,
                detail
            )))
        }
    }

    /// Verify a `Stripe-Signature` header against the raw request body.
    ///
    /// The header carries `t=<unix>,v1=<hex hmac>` pairs; the signed payload
    /// is `"{t}.{body}"`. Fails closed on any malformed input, and rejects
    /// timestamps outside the replay tolerance window.
    pub fn verify_webhook_signature(
        &self,
        body: &str,
        header: &str,
        now_unix: i64,
    ) -> Result<(), AppError> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for pair in header.split(',') {
            match pair.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(AppError::InvalidSignature)?;
        if candidates.is_empty() {
            return Err(AppError::InvalidSignature);
        }
        if (now_unix - timestamp).abs() > self.config.webhook_tolerance_secs {
            tracing::warn!(timestamp, "Webhook signature timestamp outside tolerance");
            return Err(AppError::InvalidSignature);
        }

        let signed_payload = format!("{}.{}", timestamp, body);
        let expected = compute_signature(
            &signed_payload,
            self.config.webhook_secret.expose_secret(),
        )?;

        if candidates.iter().any(|candidate| *candidate == expected) {
            Ok(())
        } else {
            tracing::warn!("Webhook signature verification failed");
            Err(AppError::InvalidSignature)
        }
    }

    /// Parse a verified webhook body into a `BillingEvent`. Event types the
    /// reconciler does not act on come back as `Ignored`; garbage fails with
    /// `BadRequest`.
    pub fn parse_webhook_event(&self, body: &str) -> Result<BillingEvent, AppError> {
        let envelope: EventEnvelope = serde_json::from_str(body)
            .map_err(|e| AppError::BadRequest(anyhow!("invalid webhook payload: {}", e)))?;

        match envelope.event_type.as_str() {
            "checkout.session.completed" => {
                let session: SessionObject = serde_json::from_value(envelope.data.object)
                    .map_err(|e| {
                        AppError::BadRequest(anyhow!("invalid checkout session object: {}", e))
                    })?;
                Ok(BillingEvent::CheckoutCompleted(CheckoutCompleted {
                    event_id: envelope.id,
                    created: envelope.created,
                    session_ref: session.id,
                    customer_ref: session.customer,
                    subscription_ref: session.subscription,
                    metadata: session.metadata,
                }))
            }
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.deleted" => {
                let deleted = envelope.event_type == "customer.subscription.deleted";
                let subscription: SubscriptionObject =
                    serde_json::from_value(envelope.data.object).map_err(|e| {
                        AppError::BadRequest(anyhow!("invalid subscription object: {}", e))
                    })?;
                let price_ref = subscription
                    .items
                    .as_ref()
                    .and_then(|items| items.data.first())
                    .map(|item| item.price.id.clone());
                let status = if deleted {
                    "canceled".to_string()
                } else {
                    subscription.status
                };
                Ok(BillingEvent::SubscriptionChanged(SubscriptionChanged {
                    event_id: envelope.id,
                    created: envelope.created,
                    subscription_ref: subscription.id,
                    customer_ref: subscription.customer,
                    price_ref,
                    status,
                    current_period_end: subscription.current_period_end,
                    metadata: subscription.metadata,
                }))
            }
            other => Ok(BillingEvent::Ignored {
                event_type: other.to_string(),
            }),
        }
    }
}

fn compute_signature(payload: &str, secret: &str) -> Result<String, AppError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow!("invalid webhook secret length")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_config() -> StripeConfig {
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

    fn sign(body: &str, secret: &str, timestamp: i64) -> String {
        let expected =
            compute_signature(&format!("{}.{}", timestamp, body), secret).unwrap();
        format!("t={},v1={}", timestamp, expected)
    }

    #[test]
    fn accepts_valid_signature() {
        let client = StripeClient::new(test_config());
        let body = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(body, "whsec_test", now);
        assert!(client.verify_webhook_signature(body, &header, now).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let client = StripeClient::new(test_config());
        let now = 1_700_000_000;
        let header = sign(r#"{"id":"evt_1"}"#, "whsec_test", now);
        let result = client.verify_webhook_signature(r#"{"id":"evt_2"}"#, &header, now);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let client = StripeClient::new(test_config());
        let body = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(body, "whsec_other", now);
        let result = client.verify_webhook_signature(body, &header, now);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let client = StripeClient::new(test_config());
        let body = r#"{"id":"evt_1"}"#;
        let signed_at = 1_700_000_000;
        let header = sign(body, "whsec_test", signed_at);
        let result = client.verify_webhook_signature(body, &header, signed_at + 301);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn rejects_malformed_header() {
        let client = StripeClient::new(test_config());
        let result = client.verify_webhook_signature("{}", "not-a-signature", 0);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn parses_checkout_completed() {
        let client = StripeClient::new(test_config());
        let body = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1700000000,
            "data": { "object": {
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "user_id": "user-1", "plan": "basic" }
            }}
        }"#;
        match client.parse_webhook_event(body).unwrap() {
            BillingEvent::CheckoutCompleted(event) => {
                assert_eq!(event.session_ref, "cs_1");
                assert_eq!(event.customer_ref.as_deref(), Some("cus_1"));
                assert_eq!(event.subscription_ref.as_deref(), Some("sub_1"));
                assert_eq!(event.metadata.user_id.as_deref(), Some("user-1"));
                assert_eq!(event.created, 1_700_000_000);
            }
            other => panic!("expected CheckoutCompleted, got {:?}", other),
        }
    }

    #[test]
    fn parses_subscription_updated() {
        let client = StripeClient::new(test_config());
        let body = r#"{
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "created": 1700000100,
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "current_period_end": 1702592100,
                "items": { "data": [ { "price": { "id": "price_basic_123" } } ] },
                "metadata": { "user_id": "user-1" }
            }}
        }"#;
        match client.parse_webhook_event(body).unwrap() {
            BillingEvent::SubscriptionChanged(event) => {
                assert_eq!(event.subscription_ref, "sub_1");
                assert_eq!(event.price_ref.as_deref(), Some("price_basic_123"));
                assert_eq!(event.status, "active");
                assert_eq!(event.current_period_end, Some(1_702_592_100));
            }
            other => panic!("expected SubscriptionChanged, got {:?}", other),
        }
    }

    #[test]
    fn subscription_deleted_is_forced_canceled() {
        let client = StripeClient::new(test_config());
        let body = r#"{
            "id": "evt_3",
            "type": "customer.subscription.deleted",
            "created": 1700000200,
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "metadata": {}
            }}
        }"#;
        match client.parse_webhook_event(body).unwrap() {
            BillingEvent::SubscriptionChanged(event) => {
                assert_eq!(event.status, "canceled");
            }
            other => panic!("expected SubscriptionChanged, got {:?}", other),
        }
    }

    #[test]
    fn unrelated_event_types_are_ignored() {
        let client = StripeClient::new(test_config());
        let body = r#"{
            "id": "evt_4",
            "type": "invoice.paid",
            "created": 1700000300,
            "data": { "object": { "id": "in_1" } }
        }"#;
        assert!(matches!(
            client.parse_webhook_event(body).unwrap(),
            BillingEvent::Ignored { event_type } if event_type == "invoice.paid"
        ));
    }

    #[test]
    fn garbage_payload_fails_closed() {
        let client = StripeClient::new(test_config());
        assert!(matches!(
            client.parse_webhook_event("not json"),
            Err(AppError::BadRequest(_))
        ));
    }
}
