//! Commissions and the reward table that prices them.

use crate::domain::{CommissionStatus, Money, SourceType, TimeMs, UserId};
use serde::{Deserialize, Serialize};

/// Money owed to a partner for exactly one qualifying event.
///
/// `(source_type, source_id)` is unique across all commissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commission {
    pub id: i64,
    pub partner_id: UserId,
    pub source_type: SourceType,
    /// Id of the ReferralSignup (SIGNUP, LISTING) or ReferralClick (CLICK).
    pub source_id: i64,
    pub amount: Money,
    pub status: CommissionStatus,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub paid_at: Option<TimeMs>,
    pub created_at: TimeMs,
    /// Period that was OPEN when the commission was written.
    pub period_id: i64,
}

/// Fixed reward per qualifying event type. Values come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardTable {
    pub signup: Money,
    pub listing: Money,
    pub click: Money,
}

impl RewardTable {
    pub fn reward_for(&self, source_type: SourceType) -> Money {
        match source_type {
            SourceType::Signup => self.signup,
            SourceType::Listing => self.listing,
            SourceType::Click => self.click,
        }
    }
}

impl Default for RewardTable {
    fn default() -> Self {
        RewardTable {
            signup: Money::naira(25),
            listing: Money::naira(25),
            click: Money::naira(15),
        }
    }
}
