//! Admin dashboard endpoints: periods, commissions, statements, sweep.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::db::{CommissionFilter, StatementFilter};
use crate::domain::{
    Commission, CommissionStatus, PartnerStatement, PayoutPeriod, StatementStatus, UserId,
};
use crate::engine::SweepReport;
use crate::error::AppError;

/// Upper bound on one commission listing page.
const MAX_COMMISSION_LIMIT: i64 = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodsResponse {
    pub periods: Vec<PayoutPeriod>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockResponse {
    pub period: PayoutPeriod,
    pub statements: Vec<PartnerStatement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsQuery {
    pub status: Option<String>,
    pub partner_id: Option<String>,
    pub period_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsResponse {
    pub commissions: Vec<Commission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementsQuery {
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub period_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementsResponse {
    pub statements: Vec<PartnerStatement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPaidRequest {
    #[serde(default)]
    pub payment_reference: String,
    pub payment_method: Option<String>,
}

pub async fn list_periods(State(state): State<AppState>) -> Result<Json<PeriodsResponse>, AppError> {
    let periods = state.settlement.periods().list_periods().await?;
    Ok(Json(PeriodsResponse { periods }))
}

pub async fn lock_current_month(
    State(state): State<AppState>,
) -> Result<Json<LockResponse>, AppError> {
    let period = state.settlement.periods().lock_current_month().await?;
    lock_response(&state, period).await
}

pub async fn lock_period(
    Path(period_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<LockResponse>, AppError> {
    let period = state.settlement.periods().lock_period(period_id).await?;
    lock_response(&state, period).await
}

async fn lock_response(state: &AppState, period: PayoutPeriod) -> Result<Json<LockResponse>, AppError> {
    let statements = state.settlement.repo().statements_for_period(period.id).await?;
    Ok(Json(LockResponse { period, statements }))
}

pub async fn aggregate_period(
    Path(period_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<StatementsResponse>, AppError> {
    let statements = state.settlement.aggregator().aggregate(period_id).await?;
    Ok(Json(StatementsResponse { statements }))
}

/// One CSV line per statement of the period.
#[derive(Debug, Serialize)]
struct StatementCsvRow<'a> {
    statement_id: i64,
    period: String,
    user_id: &'a str,
    total_earned: String,
    status: &'a str,
    vendors_referred: i64,
    vendors_activated: i64,
    clicks: i64,
    payment_reference: &'a str,
    paid_at: String,
}

pub async fn export_period(
    Path(period_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let period = state.settlement.periods().get_period(period_id).await?;
    let statements = state.settlement.repo().statements_for_period(period_id).await?;
    let month = period.month_key().to_string();

    let mut writer = csv::Writer::from_writer(Vec::new());
    for s in &statements {
        writer
            .serialize(StatementCsvRow {
                statement_id: s.id,
                period: month.clone(),
                user_id: s.user_id.as_str(),
                total_earned: s.total_earned.to_canonical_string(),
                status: s.status.as_str(),
                vendors_referred: s.vendors_referred_count,
                vendors_activated: s.vendors_activated_count,
                clicks: s.clicks_count,
                payment_reference: s.payment_reference.as_deref().unwrap_or(""),
                paid_at: s.paid_at.map(|t| t.to_string()).unwrap_or_default(),
            })
            .map_err(|e| AppError::Internal(format!("CSV export failed: {e}")))?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV export failed: {e}")))?;

    let disposition = format!("attachment; filename=\"statements-{month}.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

pub async fn list_commissions(
    Query(params): Query<CommissionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<CommissionsResponse>, AppError> {
    let status = match params.status.as_deref() {
        Some("") | None => None,
        Some(s) => Some(
            s.to_ascii_uppercase()
                .parse::<CommissionStatus>()
                .map_err(|e| AppError::BadRequest(e.to_string()))?,
        ),
    };
    let limit = match params.limit {
        Some(l) if !(1..=MAX_COMMISSION_LIMIT).contains(&l) => {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {MAX_COMMISSION_LIMIT}"
            )))
        }
        other => other,
    };

    let filter = CommissionFilter {
        status,
        partner_id: non_empty(params.partner_id).map(UserId::new),
        period_id: params.period_id,
        limit,
    };
    let commissions = state.settlement.workflow().list_commissions(&filter).await?;
    Ok(Json(CommissionsResponse { commissions }))
}

pub async fn fail_commission(
    Path(commission_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Commission>, AppError> {
    let commission = state
        .settlement
        .workflow()
        .fail_commission(commission_id)
        .await?;
    Ok(Json(commission))
}

pub async fn list_statements(
    Query(params): Query<StatementsQuery>,
    State(state): State<AppState>,
) -> Result<Json<StatementsResponse>, AppError> {
    let status = match params.status.as_deref() {
        Some("") | None => None,
        Some(s) => Some(
            s.to_ascii_uppercase()
                .parse::<StatementStatus>()
                .map_err(|e| AppError::BadRequest(e.to_string()))?,
        ),
    };

    let filter = StatementFilter {
        status,
        user_id: non_empty(params.user_id).map(UserId::new),
        period_id: params.period_id,
    };
    let statements = state.settlement.workflow().list_statements(&filter).await?;
    Ok(Json(StatementsResponse { statements }))
}

pub async fn approve_statement(
    Path(statement_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<PartnerStatement>, AppError> {
    let statement = state.settlement.workflow().approve(statement_id).await?;
    Ok(Json(statement))
}

pub async fn mark_paid(
    Path(statement_id): Path<i64>,
    State(state): State<AppState>,
    Json(req): Json<MarkPaidRequest>,
) -> Result<Json<PartnerStatement>, AppError> {
    let statement = state
        .settlement
        .workflow()
        .mark_paid(
            statement_id,
            &req.payment_reference,
            req.payment_method.as_deref(),
        )
        .await?;
    Ok(Json(statement))
}

pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = state.settlement.sweep().sweep().await?;
    Ok(Json(report))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
