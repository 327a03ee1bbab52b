//! Period manager: owns the single OPEN payout period and the month lock.

use super::aggregator::StatementAggregator;
use super::clock::Clock;
use super::{EngineError, Entity};
use crate::db::Repository;
use crate::domain::{MonthKey, PayoutPeriod, TimeMs};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on months closed by one catch-up pass.
const MAX_CATCH_UP_MONTHS: usize = 120;

/// A "lock month" repeated this soon after a late lock is the same request.
const REPEAT_LOCK_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Clone)]
pub struct PeriodManager {
    repo: Arc<Repository>,
    aggregator: StatementAggregator,
    clock: Arc<dyn Clock>,
}

impl PeriodManager {
    pub fn new(repo: Arc<Repository>, aggregator: StatementAggregator, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            aggregator,
            clock,
        }
    }

    /// The OPEN period, created if none exists.
    ///
    /// Between a month's end and its lock the OPEN period is still the old
    /// month; events keep landing there until the lock. A new period is for
    /// the later of `now`'s month and the month after the newest period.
    pub async fn get_or_create_open_period(&self, now: TimeMs) -> Result<PayoutPeriod, EngineError> {
        if let Some(open) = self.repo.get_open_period().await? {
            return Ok(open);
        }

        let mut month = MonthKey::containing(now);
        if let Some(latest) = self.repo.latest_period().await? {
            month = month.max(latest.month_key().next());
        }

        if self.repo.insert_open_period_if_absent(month).await? {
            info!(month = %month, "Opened payout period");
        }

        // A concurrent caller may have won the insert; either way one OPEN row exists now.
        self.repo
            .get_open_period()
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Period, format!("open period {month}")))
    }

    /// Lock the month the admin is looking at.
    ///
    /// An OPEN period whose month has already ended is locked first. Otherwise
    /// the period of the clock's current month is locked. Repeating the call
    /// returns the already LOCKED period and never touches the month opened by
    /// the first call.
    pub async fn lock_current_month(&self) -> Result<PayoutPeriod, EngineError> {
        let now = self.clock.now();
        let month = MonthKey::containing(now);

        if let Some(open) = self.repo.get_open_period().await? {
            if open.month_key() < month {
                return self.lock_period(open.id).await;
            }
        }

        // A late lock of last month just opened this one.
        if let Some(previous) = self.repo.get_period_by_month(month.prev()).await? {
            let window_start = now.saturating_sub_ms(REPEAT_LOCK_WINDOW_MS);
            let repeated = previous
                .locked_at
                .is_some_and(|at| at >= month.start_ms() && at >= window_start);
            if repeated {
                debug!(period_id = previous.id, "Repeated lock of last month");
                return self.lock_period(previous.id).await;
            }
        }

        let period = self
            .repo
            .get_period_by_month(month)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Period, month))?;
        self.lock_period(period.id).await
    }

    /// Lock a period, aggregate its statements and open the next month.
    ///
    /// Idempotent: a LOCKED period is returned unchanged, after resuming its
    /// aggregation if an earlier attempt stopped between lock and aggregate.
    pub async fn lock_period(&self, period_id: i64) -> Result<PayoutPeriod, EngineError> {
        match self.try_lock(period_id).await {
            Ok(()) => {}
            Err(EngineError::PeriodAlreadyLocked(period)) => {
                debug!(period_id, "Period already locked");
                if !period.aggregation_pending() {
                    return Ok(*period);
                }
                warn!(period_id, "Resuming pending aggregation for locked period");
            }
            Err(e) => return Err(e),
        }

        self.aggregator.aggregate(period_id).await?;

        self.repo
            .get_period(period_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Period, period_id))
    }

    /// Flip OPEN -> LOCKED and open the next month in one transaction.
    ///
    /// This commit is the cut-off: commissions written after it carry the
    /// next period's id.
    async fn try_lock(&self, period_id: i64) -> Result<(), EngineError> {
        let now = self.clock.now();
        let mut tx = self.repo.begin().await?;
        let locked = Repository::lock_period_and_open_next(&mut tx, period_id, now).await?;
        tx.commit().await?;

        if locked {
            info!(period_id, locked_at = %now, "Payout period locked");
            return Ok(());
        }

        match self.repo.get_period(period_id).await? {
            Some(period) => Err(EngineError::PeriodAlreadyLocked(Box::new(period))),
            None => Err(EngineError::not_found(Entity::Period, period_id)),
        }
    }

    /// Lock every OPEN period whose month has fully elapsed at `now`.
    pub async fn close_elapsed_periods(&self, now: TimeMs) -> Result<Vec<PayoutPeriod>, EngineError> {
        let mut closed = Vec::new();
        for _ in 0..MAX_CATCH_UP_MONTHS {
            let Some(open) = self.repo.get_open_period().await? else {
                break;
            };
            if open.end_date > now {
                break;
            }
            closed.push(self.lock_period(open.id).await?);
        }

        if !closed.is_empty() {
            info!(count = closed.len(), "Closed elapsed payout periods");
        }
        Ok(closed)
    }

    /// Re-run aggregation for LOCKED periods that never got their statements.
    pub async fn resume_pending_aggregations(&self) -> Result<usize, EngineError> {
        let pending = self.repo.periods_pending_aggregation().await?;
        for period in &pending {
            warn!(period_id = period.id, month = %period.month_key(), "Aggregation pending, resuming");
            self.aggregator.aggregate(period.id).await?;
        }
        Ok(pending.len())
    }

    pub async fn list_periods(&self) -> Result<Vec<PayoutPeriod>, EngineError> {
        Ok(self.repo.list_periods().await?)
    }

    pub async fn get_period(&self, period_id: i64) -> Result<PayoutPeriod, EngineError> {
        self.repo
            .get_period(period_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Period, period_id))
    }
}
