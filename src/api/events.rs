//! Inbound referral events from the link tracker and the vendor service.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{require_non_empty, AppState};
use crate::domain::{ReferralClick, ReferralSignup, UserId};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickStartRequest {
    pub code: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickQualifyRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub code: String,
    pub vendor_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorEventRequest {
    pub vendor_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorEventResponse {
    /// False when the vendor did not come through a referral code.
    pub referred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signup: Option<ReferralSignup>,
}

pub async fn click_start(
    State(state): State<AppState>,
    Json(req): Json<ClickStartRequest>,
) -> Result<(StatusCode, Json<ReferralClick>), AppError> {
    let code = require_non_empty("code", &req.code)?;
    let session_id = require_non_empty("sessionId", &req.session_id)?;
    let click = state
        .settlement
        .recorder()
        .record_click_start(code, session_id)
        .await?;
    Ok((StatusCode::CREATED, Json(click)))
}

pub async fn click_qualify(
    State(state): State<AppState>,
    Json(req): Json<ClickQualifyRequest>,
) -> Result<Json<ReferralClick>, AppError> {
    let session_id = require_non_empty("sessionId", &req.session_id)?;
    let click = state
        .settlement
        .recorder()
        .record_click_qualify(session_id)
        .await?;
    Ok(Json(click))
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<ReferralSignup>), AppError> {
    let code = require_non_empty("code", &req.code)?;
    let vendor = UserId::new(require_non_empty("vendorId", &req.vendor_id)?);
    let signup = state
        .settlement
        .recorder()
        .record_signup(code, &vendor)
        .await?;
    Ok((StatusCode::CREATED, Json(signup)))
}

pub async fn vendor_qualified(
    State(state): State<AppState>,
    Json(req): Json<VendorEventRequest>,
) -> Result<Json<VendorEventResponse>, AppError> {
    let vendor = UserId::new(require_non_empty("vendorId", &req.vendor_id)?);
    let signup = state
        .settlement
        .recorder()
        .record_vendor_qualified(&vendor)
        .await?;
    Ok(Json(VendorEventResponse {
        referred: signup.is_some(),
        signup,
    }))
}

pub async fn first_listing(
    State(state): State<AppState>,
    Json(req): Json<VendorEventRequest>,
) -> Result<Json<VendorEventResponse>, AppError> {
    let vendor = UserId::new(require_non_empty("vendorId", &req.vendor_id)?);
    let signup = state
        .settlement
        .recorder()
        .record_first_listing(&vendor)
        .await?;
    Ok(Json(VendorEventResponse {
        referred: signup.is_some(),
        signup,
    }))
}
