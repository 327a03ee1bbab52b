//! Statement aggregator: folds a LOCKED period's commissions into per-partner statements.

use super::clock::Clock;
use super::{EngineError, Entity};
use crate::db::Repository;
use crate::domain::{
    Commission, Money, MoneyError, NewStatement, PartnerStatement, PeriodStatus, UserId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Referral activity per partner within one period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityCounts {
    pub vendors_referred: HashMap<UserId, i64>,
    pub vendors_activated: HashMap<UserId, i64>,
    pub clicks: HashMap<UserId, i64>,
}

#[derive(Clone)]
pub struct StatementAggregator {
    repo: Arc<Repository>,
    clock: Arc<dyn Clock>,
}

impl StatementAggregator {
    pub fn new(repo: Arc<Repository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Produce the period's statements, exactly once.
    ///
    /// Re-running for an aggregated period returns the existing statements
    /// without writing anything.
    pub async fn aggregate(&self, period_id: i64) -> Result<Vec<PartnerStatement>, EngineError> {
        match self.try_aggregate(period_id).await {
            Ok(created) => {
                info!(period_id, statements = created, "Period aggregated");
            }
            Err(EngineError::AggregationAlreadyRun(_)) => {
                debug!(period_id, "Aggregation already ran");
            }
            Err(e) => return Err(e),
        }
        Ok(self.repo.statements_for_period(period_id).await?)
    }

    async fn try_aggregate(&self, period_id: i64) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let mut tx = self.repo.begin().await?;

        // The claim is the first write, so the rest of the transaction runs
        // under SQLite's writer lock.
        if !Repository::claim_aggregation(&mut tx, period_id, now).await? {
            let period = Repository::get_period_in(&mut tx, period_id).await?;
            tx.rollback().await?;
            return Err(match period {
                None => EngineError::not_found(Entity::Period, period_id),
                Some(p) if p.status == PeriodStatus::Open => EngineError::PeriodNotLocked(period_id),
                Some(_) => EngineError::AggregationAlreadyRun(period_id),
            });
        }

        let commissions = Repository::commissions_for_period(&mut tx, period_id).await?;
        let counts = ActivityCounts {
            vendors_referred: Repository::referred_vendors_by_owner(&mut tx, period_id)
                .await?
                .into_iter()
                .collect(),
            vendors_activated: Repository::activated_vendors_by_owner(&mut tx, period_id)
                .await?
                .into_iter()
                .collect(),
            clicks: Repository::qualified_clicks_by_owner(&mut tx, period_id)
                .await?
                .into_iter()
                .collect(),
        };

        let statements = build_statements(&commissions, &counts)?;
        let created = Repository::insert_statements(&mut tx, period_id, &statements, now).await?;
        tx.commit().await?;
        Ok(created)
    }
}

/// Group payable commissions by partner into statement snapshots.
///
/// FAILED commissions contribute nothing; a partner without any payable
/// commission gets no statement. Output is ordered by partner id.
pub fn build_statements(
    commissions: &[Commission],
    counts: &ActivityCounts,
) -> Result<Vec<NewStatement>, MoneyError> {
    let mut totals: BTreeMap<&UserId, Money> = BTreeMap::new();
    for commission in commissions.iter().filter(|c| c.status.is_payable()) {
        let total = totals.entry(&commission.partner_id).or_default();
        *total = total.checked_add(commission.amount)?;
    }

    let count = |map: &HashMap<UserId, i64>, user: &UserId| map.get(user).copied().unwrap_or(0);

    Ok(totals
        .into_iter()
        .map(|(user_id, total_earned)| NewStatement {
            user_id: user_id.clone(),
            total_earned,
            vendors_referred_count: count(&counts.vendors_referred, user_id),
            vendors_activated_count: count(&counts.vendors_activated, user_id),
            clicks_count: count(&counts.clicks, user_id),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommissionStatus, SourceType, TimeMs};

    fn commission(id: i64, partner: &str, amount: u32, status: CommissionStatus) -> Commission {
        Commission {
            id,
            partner_id: UserId::new(partner),
            source_type: SourceType::Click,
            source_id: id,
            amount: Money::naira(amount),
            status,
            payment_method: None,
            payment_reference: None,
            paid_at: None,
            created_at: TimeMs::new(id),
            period_id: 1,
        }
    }

    #[test]
    fn test_groups_by_partner_and_excludes_failed() {
        let commissions = vec![
            commission(1, "p2", 15, CommissionStatus::Pending),
            commission(2, "p1", 25, CommissionStatus::Pending),
            commission(3, "p1", 25, CommissionStatus::Success),
            commission(4, "p1", 15, CommissionStatus::Failed),
        ];
        let statements = build_statements(&commissions, &ActivityCounts::default()).unwrap();

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].user_id, UserId::new("p1"));
        assert_eq!(statements[0].total_earned, Money::naira(50));
        assert_eq!(statements[1].user_id, UserId::new("p2"));
        assert_eq!(statements[1].total_earned, Money::naira(15));
    }

    #[test]
    fn test_only_failed_commissions_yield_no_statement() {
        let commissions = vec![commission(1, "p1", 25, CommissionStatus::Failed)];
        assert!(build_statements(&commissions, &ActivityCounts::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_activity_counts_attach_to_earning_partners_only() {
        let mut counts = ActivityCounts::default();
        counts.vendors_referred.insert(UserId::new("p1"), 2);
        counts.vendors_activated.insert(UserId::new("p1"), 1);
        counts.clicks.insert(UserId::new("p1"), 4);
        counts.clicks.insert(UserId::new("p3"), 9);

        let statements = build_statements(
            &[commission(1, "p1", 25, CommissionStatus::Pending)],
            &counts,
        )
        .unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].vendors_referred_count, 2);
        assert_eq!(statements[0].vendors_activated_count, 1);
        assert_eq!(statements[0].clicks_count, 4);
    }

    #[test]
    fn test_conservation_of_payable_amounts() {
        let commissions: Vec<Commission> = (1..=20)
            .map(|i| {
                let status = if i % 7 == 0 {
                    CommissionStatus::Failed
                } else {
                    CommissionStatus::Pending
                };
                commission(i, &format!("p{}", i % 4), (i as u32) * 3, status)
            })
            .collect();

        let statements = build_statements(&commissions, &ActivityCounts::default()).unwrap();
        let statement_total = Money::total(statements.iter().map(|s| s.total_earned)).unwrap();
        let payable_total = Money::total(
            commissions
                .iter()
                .filter(|c| c.status != CommissionStatus::Failed)
                .map(|c| c.amount),
        )
        .unwrap();
        assert_eq!(statement_total, payable_total);
    }

    #[test]
    fn test_overflowing_total_is_an_error() {
        let mut huge = commission(1, "p1", 0, CommissionStatus::Pending);
        huge.amount = Money::try_from_decimal(rust_decimal::Decimal::MAX).unwrap();
        let commissions = vec![huge, commission(2, "p1", 1, CommissionStatus::Pending)];
        assert_eq!(
            build_statements(&commissions, &ActivityCounts::default()),
            Err(MoneyError::Overflow)
        );
    }
}
