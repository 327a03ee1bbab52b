//! Referral codes and the raw events recorded against them.

use crate::domain::{ClickStatus, QualificationStatus, TimeMs, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A partner's referral code. Never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCode {
    pub code: String,
    pub owner_id: UserId,
    pub created_at: TimeMs,
    pub active: bool,
}

impl ReferralCode {
    /// Derive a fresh code for an owner: 8 upper-hex chars of
    /// SHA-256(owner_id || nonce).
    pub fn generate(owner_id: &UserId, nonce: &uuid::Uuid) -> String {
        let mut hasher = Sha256::new();
        hasher.update((owner_id.as_str().len() as u32).to_le_bytes());
        hasher.update(owner_id.as_str().as_bytes());
        hasher.update(nonce.as_bytes());
        let hash = hasher.finalize();
        hex::encode_upper(&hash[..4])
    }

    /// Normalize user-supplied code text (links are case-insensitive).
    pub fn normalize(code: &str) -> String {
        code.trim().to_ascii_uppercase()
    }
}

/// One tracked link visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralClick {
    pub id: i64,
    pub code: String,
    pub session_id: String,
    pub status: ClickStatus,
    pub started_at: TimeMs,
    pub qualified_at: Option<TimeMs>,
    /// Period that was OPEN when the click qualified.
    pub period_id: Option<i64>,
}

/// A vendor registered through a referral code. At most one per vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSignup {
    pub id: i64,
    pub code: String,
    pub vendor_id: UserId,
    pub signup_status: QualificationStatus,
    pub listing_status: QualificationStatus,
    pub created_at: TimeMs,
    /// Period that was OPEN when the signup was recorded.
    pub period_id: i64,
    /// Period in which the second of the two qualifications landed.
    pub activated_period_id: Option<i64>,
}

impl ReferralSignup {
    /// Both the account and the first listing have qualified.
    pub fn is_activated(&self) -> bool {
        self.signup_status == QualificationStatus::Qualified
            && self.listing_status == QualificationStatus::Qualified
    }
}
