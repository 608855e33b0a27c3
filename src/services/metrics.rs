use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static ANALYSES_CONSUMED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static QUOTA_EXHAUSTED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static QUOTA_RESET_PROFILES_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Initialize the metrics registry. Idempotent so test harnesses can build
/// multiple applications in one process.
pub fn init_metrics() {
    REGISTRY.get_or_init(|| {
        let registry = Registry::new();

        let consumed = IntCounterVec::new(
            Opts::new(
                "billing_analyses_consumed_total",
                "Successful quota consumptions by plan",
            ),
            &["plan"],
        )
        .expect("failed to create billing_analyses_consumed_total metric");

        let exhausted = IntCounterVec::new(
            Opts::new(
                "billing_quota_exhausted_total",
                "Consumption attempts rejected for exhausted quota, by plan",
            ),
            &["plan"],
        )
        .expect("failed to create billing_quota_exhausted_total metric");

        let webhook_events = IntCounterVec::new(
            Opts::new(
                "billing_webhook_events_total",
                "Webhook events by type and reconciliation outcome",
            ),
            &["event", "outcome"],
        )
        .expect("failed to create billing_webhook_events_total metric");

        let reset_profiles = IntCounter::new(
            "billing_quota_reset_profiles_total",
            "Profiles refilled by the quota reset job",
        )
        .expect("failed to create billing_quota_reset_profiles_total metric");

        registry
            .register(Box::new(consumed.clone()))
            .expect("failed to register billing_analyses_consumed_total");
        registry
            .register(Box::new(exhausted.clone()))
            .expect("failed to register billing_quota_exhausted_total");
        registry
            .register(Box::new(webhook_events.clone()))
            .expect("failed to register billing_webhook_events_total");
        registry
            .register(Box::new(reset_profiles.clone()))
            .expect("failed to register billing_quota_reset_profiles_total");

        ANALYSES_CONSUMED_TOTAL.set(consumed).ok();
        QUOTA_EXHAUSTED_TOTAL.set(exhausted).ok();
        WEBHOOK_EVENTS_TOTAL.set(webhook_events).ok();
        QUOTA_RESET_PROFILES_TOTAL.set(reset_profiles).ok();

        registry
    });
}

pub fn get_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized\n".to_string();
    };
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).ok();
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_consumption(plan: &str) {
    if let Some(counter) = ANALYSES_CONSUMED_TOTAL.get() {
        counter.with_label_values(&[plan]).inc();
    }
}

pub fn record_exhaustion(plan: &str) {
    if let Some(counter) = QUOTA_EXHAUSTED_TOTAL.get() {
        counter.with_label_values(&[plan]).inc();
    }
}

pub fn record_webhook_event(event: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event, outcome]).inc();
    }
}

pub fn record_reset(profiles: u64) {
    if let Some(counter) = QUOTA_RESET_PROFILES_TOTAL.get() {
        counter.inc_by(profiles);
    }
}
