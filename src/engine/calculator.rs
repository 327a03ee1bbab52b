//! Commission calculator: one qualifying event becomes exactly one commission.

use super::clock::Clock;
use super::periods::PeriodManager;
use super::{EngineError, Entity};
use crate::db::Repository;
use crate::domain::{Commission, RewardTable, SourceType, TimeMs, UserId};
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct CommissionCalculator {
    repo: Arc<Repository>,
    periods: PeriodManager,
    rewards: RewardTable,
    clock: Arc<dyn Clock>,
}

impl CommissionCalculator {
    pub fn new(
        repo: Arc<Repository>,
        periods: PeriodManager,
        rewards: RewardTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            periods,
            rewards,
            clock,
        }
    }

    pub fn periods(&self) -> &PeriodManager {
        &self.periods
    }

    /// Credit `partner_id` for the event `(source_type, source_id)`.
    ///
    /// Safe to call any number of times, concurrently: the first call inserts a
    /// PENDING commission, every later call returns that same row.
    pub async fn credit(
        &self,
        partner_id: &UserId,
        source_type: SourceType,
        source_id: i64,
    ) -> Result<Commission, EngineError> {
        let now = self.clock.now();
        self.periods.get_or_create_open_period(now).await?;

        let mut tx = self.repo.begin().await?;
        let commission = self
            .credit_in(&mut tx, partner_id, source_type, source_id, now)
            .await?;
        tx.commit().await?;
        Ok(commission)
    }

    /// Same as [`credit`](Self::credit) inside the caller's transaction.
    ///
    /// The caller must have ensured an OPEN period exists.
    pub(crate) async fn credit_in(
        &self,
        conn: &mut SqliteConnection,
        partner_id: &UserId,
        source_type: SourceType,
        source_id: i64,
        now: TimeMs,
    ) -> Result<Commission, EngineError> {
        let amount = self.rewards.reward_for(source_type);
        let inserted = Repository::insert_commission_if_absent(
            conn,
            partner_id,
            source_type,
            source_id,
            amount,
            now,
        )
        .await?;

        let commission = Repository::get_commission_by_source(conn, source_type, source_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(Entity::Commission, format!("{source_type}:{source_id}"))
            })?;

        if inserted {
            info!(
                partner = %partner_id,
                source_type = %source_type,
                source_id,
                amount = %amount,
                period_id = commission.period_id,
                "Commission credited"
            );
        } else {
            debug!(
                source_type = %source_type,
                source_id,
                commission_id = commission.id,
                "Commission already exists for event"
            );
        }
        Ok(commission)
    }
}
