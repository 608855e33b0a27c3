#![allow(dead_code)]

use hmac::{Hmac, Mac};
use ilyzlist_billing::config::{Config, DatabaseConfig, ServerConfig, StripeConfig};
use ilyzlist_billing::Application;
use secrecy::Secret;
use sha2::Sha256;
use wiremock::MockServer;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const PRICE_BASIC: &str = "price_basic_test";
pub const PRICE_PREMIUM: &str = "price_premium_test";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: mongodb::Database,
    pub db_name: String,
    pub stripe_mock: MockServer,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let stripe_mock = MockServer::start().await;
        let db_name = format!("billing_test_{}", uuid::Uuid::new_v4());

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(
                    std::env::var("TEST_MONGODB_URI")
                        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
                ),
                db_name: db_name.clone(),
            },
            stripe: StripeConfig {
                secret_key: Secret::new("sk_test_key".to_string()),
                webhook_secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()),
                api_base_url: stripe_mock.uri(),
                price_basic: PRICE_BASIC.to_string(),
                price_premium: PRICE_PREMIUM.to_string(),
                checkout_success_url: "https://example.com/success".to_string(),
                checkout_cancel_url: "https://example.com/cancel".to_string(),
                timeout_secs: 5,
                webhook_tolerance_secs: 300,
            },
            service_name: "ilyzlist-billing-test".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let db = app.db().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to come up.
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            db,
            db_name,
            stripe_mock,
            client,
        }
    }

    pub async fn create_profile(&self, user_id: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/profiles", self.address))
            .json(&serde_json::json!({ "user_id": user_id }))
            .send()
            .await
            .expect("Failed to create profile")
    }

    pub async fn quota(&self, user_id: &str) -> serde_json::Value {
        self.client
            .get(format!("{}/profiles/{}/quota", self.address, user_id))
            .send()
            .await
            .expect("Failed to fetch quota")
            .json()
            .await
            .expect("Quota response was not JSON")
    }

    pub async fn consume(&self, user_id: &str) -> reqwest::Response {
        self.client
            .post(format!(
                "{}/profiles/{}/quota/consume",
                self.address, user_id
            ))
            .send()
            .await
            .expect("Failed to call consume")
    }

    /// Deliver a webhook body signed with the test secret at the current
    /// time.
    pub async fn deliver_webhook(&self, body: &str) -> reqwest::Response {
        let header = stripe_signature(body, chrono::Utc::now().timestamp());
        self.client
            .post(format!("{}/webhooks/stripe", self.address))
            .header("Stripe-Signature", header)
            .body(body.to_string())
            .send()
            .await
            .expect("Failed to deliver webhook")
    }

    pub async fn cleanup(&self) {
        self.db
            .drop(None)
            .await
            .expect("Failed to drop test database");
    }
}

/// Stripe-Signature header over `"{t}.{body}"` with the given secret.
pub fn stripe_signature_with(body: &str, timestamp: i64, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

pub fn stripe_signature(body: &str, timestamp: i64) -> String {
    stripe_signature_with(body, timestamp, TEST_WEBHOOK_SECRET)
}

/// A `customer.subscription.updated` event body.
pub fn subscription_event(
    event_id: &str,
    created: i64,
    subscription_ref: &str,
    customer_ref: &str,
    price_ref: &str,
    status: &str,
    user_id: Option<&str>,
    period_end: i64,
) -> String {
    let mut metadata = serde_json::Map::new();
    if let Some(user_id) = user_id {
        metadata.insert("user_id".to_string(), serde_json::json!(user_id));
    }
    serde_json::json!({
        "id": event_id,
        "type": "customer.subscription.updated",
        "created": created,
        "data": { "object": {
            "id": subscription_ref,
            "customer": customer_ref,
            "status": status,
            "current_period_end": period_end,
            "items": { "data": [ { "price": { "id": price_ref } } ] },
            "metadata": metadata,
        }}
    })
    .to_string()
}
