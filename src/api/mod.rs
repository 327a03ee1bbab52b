pub mod admin;
pub mod events;
pub mod health;
pub mod partners;

use crate::error::AppError;
use crate::orchestration::Settlement;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub settlement: Settlement,
}

impl AppState {
    pub fn new(settlement: Settlement) -> Self {
        Self { settlement }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/partners/:id/activate", post(partners::activate_partner))
        .route("/v1/partners/:id/earnings", get(partners::get_earnings))
        .route("/v1/codes/:code/deactivate", post(partners::deactivate_code))
        .route("/v1/events/click-start", post(events::click_start))
        .route("/v1/events/click-qualify", post(events::click_qualify))
        .route("/v1/events/signup", post(events::signup))
        .route("/v1/events/vendor-qualified", post(events::vendor_qualified))
        .route("/v1/events/first-listing", post(events::first_listing))
        .route("/v1/admin/periods", get(admin::list_periods))
        .route("/v1/admin/periods/lock", post(admin::lock_current_month))
        .route("/v1/admin/periods/:id/lock", post(admin::lock_period))
        .route("/v1/admin/periods/:id/aggregate", post(admin::aggregate_period))
        .route("/v1/admin/periods/:id/export", get(admin::export_period))
        .route("/v1/admin/commissions", get(admin::list_commissions))
        .route("/v1/admin/commissions/:id/fail", post(admin::fail_commission))
        .route("/v1/admin/statements", get(admin::list_statements))
        .route("/v1/admin/statements/:id/approve", post(admin::approve_statement))
        .route("/v1/admin/statements/:id/mark-paid", post(admin::mark_paid))
        .route("/v1/admin/sweep", post(admin::run_sweep))
        .layer(cors)
        .with_state(state)
}

/// Reject blank identifiers before they reach the engine.
pub(crate) fn require_non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}
