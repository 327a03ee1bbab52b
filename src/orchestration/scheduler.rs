//! Periodic jobs: month close with aggregation recovery, and the reconciliation sweep.

use crate::engine::{Clock, EngineError, SweepReport};
use crate::orchestration::settlement::Settlement;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// What one period tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodTick {
    pub closed: usize,
    pub resumed: usize,
}

pub struct Scheduler {
    settlement: Settlement,
    clock: Arc<dyn Clock>,
    period_interval: Duration,
    sweep_interval: Duration,
}

impl Scheduler {
    pub fn new(
        settlement: Settlement,
        clock: Arc<dyn Clock>,
        period_interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            settlement,
            clock,
            period_interval,
            sweep_interval,
        }
    }

    /// Lock every elapsed month, then finish any aggregation a crash left pending.
    pub async fn run_period_tick(&self) -> Result<PeriodTick, EngineError> {
        let periods = self.settlement.periods();
        let resumed = periods.resume_pending_aggregations().await?;
        let closed = periods.close_elapsed_periods(self.clock.now()).await?.len();
        Ok(PeriodTick { closed, resumed })
    }

    pub async fn run_sweep(&self) -> Result<SweepReport, EngineError> {
        self.settlement.sweep().sweep().await
    }

    /// Spawn both loops. Failures are logged and retried on the next tick.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let scheduler = Arc::new(self);

        let periods = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let mut ticker = interval(scheduler.period_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match scheduler.run_period_tick().await {
                        Ok(tick) if tick != PeriodTick::default() => {
                            info!(closed = tick.closed, resumed = tick.resumed, "Period tick");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Period tick failed"),
                    }
                }
            })
        };

        let sweep = tokio::spawn(async move {
            let mut ticker = interval(scheduler.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.run_sweep().await {
                    error!(error = %e, "Reconciliation sweep failed");
                }
            }
        });

        vec![periods, sweep]
    }
}
