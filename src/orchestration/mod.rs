pub mod scheduler;
pub mod settlement;

pub use scheduler::{PeriodTick, Scheduler};
pub use settlement::{PartnerEarnings, Settlement, SettlementOptions};
