//! Checkout initiation tests against a mocked Stripe API.

mod common;

use common::TestApp;
use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

async fn start_checkout(app: &TestApp, user_id: &str, plan: &str) -> reqwest::Response {
    app.client
        .post(format!("{}/checkout", app.address))
        .json(&json!({
            "user_id": user_id,
            "email": "parent@example.com",
            "plan": plan,
        }))
        .send()
        .await
        .expect("Failed to call checkout")
}

#[tokio::test]
async fn checkout_returns_redirect_and_reuses_the_customer() {
    let app = TestApp::spawn().await;
    app.create_profile("user-checkout").await;

    // The customer must be created exactly once across retries.
    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_test_1" })))
        .expect(1)
        .mount(&app.stripe_mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_1",
            "url": "https://checkout.stripe.test/c/cs_test_1",
        })))
        .expect(2)
        .mount(&app.stripe_mock)
        .await;

    let response = start_checkout(&app, "user-checkout", "basic").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["session_ref"], "cs_test_1");
    assert_eq!(body["redirect_url"], "https://checkout.stripe.test/c/cs_test_1");

    // Retry: the persisted customer reference is reused.
    let response = start_checkout(&app, "user-checkout", "basic").await;
    assert_eq!(response.status(), StatusCode::OK);

    // Initiation never changes plan or quota; only the reconciler does.
    let quota = app.quota("user-checkout").await;
    assert_eq!(quota["plan"], "free");
    assert_eq!(quota["quota_remaining"], 3);

    app.cleanup().await;
}

#[tokio::test]
async fn checkout_creates_a_missing_profile_lazily() {
    let app = TestApp::spawn().await;

    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_test_2" })))
        .mount(&app.stripe_mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_2",
            "url": "https://checkout.stripe.test/c/cs_test_2",
        })))
        .mount(&app.stripe_mock)
        .await;

    let response = start_checkout(&app, "user-lazy", "premium").await;
    assert_eq!(response.status(), StatusCode::OK);

    let quota = app.quota("user-lazy").await;
    assert_eq!(quota["plan"], "free");

    app.cleanup().await;
}

#[tokio::test]
async fn checkout_for_the_free_plan_is_rejected() {
    let app = TestApp::spawn().await;
    app.create_profile("user-free-checkout").await;

    let response = start_checkout(&app, "user-free-checkout", "free").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await;
}

#[tokio::test]
async fn checkout_for_an_unknown_plan_is_rejected() {
    let app = TestApp::spawn().await;

    let response = start_checkout(&app, "user-unknown-plan", "enterprise").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await;
}

#[tokio::test]
async fn provider_failure_surfaces_as_retryable_bad_gateway() {
    let app = TestApp::spawn().await;
    app.create_profile("user-provider-down").await;

    Mock::given(method("POST"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "type": "api_error", "message": "something went wrong" }
        })))
        .mount(&app.stripe_mock)
        .await;

    let response = start_checkout(&app, "user-provider-down", "basic").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "payment_provider_error");

    app.cleanup().await;
}
