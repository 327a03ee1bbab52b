//! Domain types for the referral settlement engine.
//!
//! This module provides:
//! - Lossless naira amounts via `Money`
//! - Primitives: `TimeMs`, `UserId`, `MonthKey`
//! - Status enums with their persisted text form
//! - Referral, commission, period and statement records

pub mod commission;
pub mod money;
pub mod period;
pub mod primitives;
pub mod referral;
pub mod status;

pub use commission::{Commission, RewardTable};
pub use money::{Money, MoneyError};
pub use period::{NewStatement, PartnerStatement, PayoutPeriod};
pub use primitives::{MonthKey, TimeMs, UserId};
pub use referral::{ReferralClick, ReferralCode, ReferralSignup};
pub use status::{
    ClickStatus, CommissionStatus, PeriodStatus, QualificationStatus, SourceType, StatementStatus,
    UnknownStatus,
};
