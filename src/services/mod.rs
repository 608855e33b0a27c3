pub mod metrics;
pub mod reconciler;
pub mod repository;
pub mod stripe;

pub use metrics::{get_metrics, init_metrics};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use repository::ProfileRepository;
pub use stripe::StripeClient;
