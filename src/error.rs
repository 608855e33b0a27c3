use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error taxonomy.
///
/// Expected billing outcomes (`QuotaExhausted`) are distinct variants so
/// callers handle them explicitly instead of matching on message strings.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("analysis quota exhausted")]
    QuotaExhausted,

    #[error("payment provider error: {0}")]
    PaymentProvider(anyhow::Error),

    #[error("no price configured for plan '{0}'")]
    PlanNotConfigured(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("could not resolve event to a user: {0}")]
    UnresolvedUser(String),

    #[error("unknown plan '{0}'")]
    UnknownPlan(String),

    #[error("bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("not found: {0}")]
    NotFound(anyhow::Error),

    #[error("database error: {0}")]
    Database(anyhow::Error),

    #[error("internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("configuration error: {0}")]
    Config(anyhow::Error),
}

impl AppError {
    /// Machine-readable error code carried in responses so the UI can
    /// branch without parsing messages (e.g. the upgrade prompt).
    pub fn code(&self) -> &'static str {
        match self {
            AppError::QuotaExhausted => "quota_exhausted",
            AppError::PaymentProvider(_) => "payment_provider_error",
            AppError::PlanNotConfigured(_) => "plan_not_configured",
            AppError::InvalidSignature => "invalid_signature",
            AppError::UnresolvedUser(_) => "unresolved_user",
            AppError::UnknownPlan(_) => "unknown_plan",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
        }
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::Database(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let code = self.code();
        let (status, error_message, details) = match self {
            AppError::QuotaExhausted => (
                StatusCode::PAYMENT_REQUIRED,
                "Analysis quota exhausted for the current cycle".to_string(),
                None,
            ),
            AppError::PaymentProvider(err) => (
                StatusCode::BAD_GATEWAY,
                "Payment provider unavailable, please try again".to_string(),
                Some(err.to_string()),
            ),
            // Operator misconfiguration: logged at the call site, the
            // user only sees a generic failure.
            AppError::PlanNotConfigured(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "Invalid webhook signature".to_string(),
                None,
            ),
            AppError::UnresolvedUser(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Event could not be attributed to a user".to_string(),
                None,
            ),
            AppError::UnknownPlan(plan) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(format!("unknown plan '{}'", plan)),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(err.to_string()),
            ),
            AppError::Config(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                code,
                details,
            }),
        )
            .into_response()
    }
}
