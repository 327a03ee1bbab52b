use axum::extract::{Path, State};
use axum::Json;

use super::{require_non_empty, AppState};
use crate::domain::{ReferralCode, UserId};
use crate::error::AppError;
use crate::orchestration::PartnerEarnings;

pub async fn activate_partner(
    Path(partner_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ReferralCode>, AppError> {
    let partner = UserId::new(require_non_empty("partner id", &partner_id)?);
    let code = state.settlement.recorder().activate_partner(&partner).await?;
    Ok(Json(code))
}

pub async fn deactivate_code(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ReferralCode>, AppError> {
    let code = require_non_empty("code", &code)?;
    let code = state.settlement.recorder().deactivate_code(code).await?;
    Ok(Json(code))
}

pub async fn get_earnings(
    Path(partner_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PartnerEarnings>, AppError> {
    let partner = UserId::new(require_non_empty("partner id", &partner_id)?);
    let earnings = state.settlement.partner_earnings(&partner).await?;
    Ok(Json(earnings))
}
