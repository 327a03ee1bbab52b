//! Payout periods and partner statements.

use crate::domain::{MonthKey, Money, PeriodStatus, StatementStatus, TimeMs, UserId};
use serde::{Deserialize, Serialize};

/// One calendar month of commissions. At most one is OPEN at a time; LOCKED is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutPeriod {
    pub id: i64,
    pub year: i32,
    pub month: u32,
    pub status: PeriodStatus,
    /// Running total of PAID statements, incremented once per statement.
    pub total_payout_amount: Money,
    pub total_partners_paid: i64,
    pub start_date: TimeMs,
    pub end_date: TimeMs,
    pub locked_at: Option<TimeMs>,
    /// Set in the same transaction that writes the period's statements.
    pub aggregated_at: Option<TimeMs>,
}

impl PayoutPeriod {
    pub fn month_key(&self) -> MonthKey {
        MonthKey {
            year: self.year,
            month: self.month,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PeriodStatus::Open
    }

    /// LOCKED but statements not yet written.
    pub fn aggregation_pending(&self) -> bool {
        self.status == PeriodStatus::Locked && self.aggregated_at.is_none()
    }
}

/// Immutable per-partner snapshot of one period's earnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerStatement {
    pub id: i64,
    pub period_id: i64,
    pub user_id: UserId,
    /// Frozen at aggregation; never recomputed.
    pub total_earned: Money,
    pub status: StatementStatus,
    pub vendors_referred_count: i64,
    pub vendors_activated_count: i64,
    pub clicks_count: i64,
    pub payment_reference: Option<String>,
    pub created_at: TimeMs,
    pub approved_at: Option<TimeMs>,
    pub paid_at: Option<TimeMs>,
}

/// A statement about to be written by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStatement {
    pub user_id: UserId,
    pub total_earned: Money,
    pub vendors_referred_count: i64,
    pub vendors_activated_count: i64,
    pub clicks_count: i64,
}
