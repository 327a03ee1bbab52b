pub mod api;
pub mod config;
pub mod db;
pub mod directory;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository};
pub use directory::{HttpUserDirectory, MockUserDirectory, UserDirectory};
pub use domain::{
    ClickStatus, Commission, CommissionStatus, Money, MonthKey, PartnerStatement, PayoutPeriod,
    PeriodStatus, ReferralClick, ReferralCode, ReferralSignup, RewardTable, SourceType,
    StatementStatus, TimeMs, UserId,
};
pub use engine::{Clock, EngineError, ManualClock, SystemClock};
pub use error::AppError;
pub use orchestration::{Scheduler, Settlement, SettlementOptions};
