//! Settlement engine: referral events in, frozen monthly statements out.
//!
//! Components share one `Repository` and one `Clock`; every cross-request
//! guarantee (one commission per event, one OPEN period, one aggregation per
//! period, forward-only statement status) is enforced by the store.

pub mod aggregator;
pub mod calculator;
pub mod clock;
mod error;
pub mod periods;
pub mod recorder;
pub mod sweep;
pub mod workflow;

pub use aggregator::{build_statements, ActivityCounts, StatementAggregator};
pub use calculator::CommissionCalculator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, Entity};
pub use periods::PeriodManager;
pub use recorder::EventRecorder;
pub use sweep::{OrphanReason, OrphanedReference, ReconciliationSweep, SweepReport};
pub use workflow::StatementWorkflow;
