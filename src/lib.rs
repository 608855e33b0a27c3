pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::Config;
use middleware::request_id_middleware;
use services::{init_metrics, ProfileRepository, Reconciler, StripeClient};

/// Shared application state. All mutable state lives in the profile store;
/// everything here is a cheap clone per request.
#[derive(Clone)]
pub struct AppState {
    pub db: mongodb::Database,
    pub config: Config,
    pub repository: ProfileRepository,
    pub stripe: StripeClient,
    pub reconciler: Reconciler,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some("ilyzlist-billing".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let repository = ProfileRepository::new(&db);
        repository.init_indexes().await?;

        let stripe = StripeClient::new(config.stripe.clone());
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - checkout and webhooks will fail");
        }

        let reconciler = Reconciler::new(repository.clone(), stripe.clone(), config.stripe.clone());

        init_metrics();

        let state = AppState {
            db,
            config: config.clone(),
            repository,
            stripe,
            reconciler,
        };

        // Port 0 binds a random port for tests.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn db(&self) -> &mongodb::Database {
        &self.state.db
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            // Profile / quota
            .route("/profiles", post(handlers::quota::create_profile))
            .route("/profiles/:user_id/quota", get(handlers::quota::quota_status))
            .route(
                "/profiles/:user_id/quota/consume",
                post(handlers::quota::consume_quota),
            )
            // Billing
            .route("/checkout", post(handlers::checkout::start_checkout))
            .route("/webhooks/stripe", post(handlers::webhooks::stripe_webhook))
            // Scheduler entry point
            .route("/jobs/quota-reset", post(handlers::reset::reset_quotas))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get(middleware::REQUEST_ID_HEADER)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(self.state);

        tracing::info!("Listening on port {}", self.port);
        axum::serve(self.listener, router).await?;

        Ok(())
    }
}
