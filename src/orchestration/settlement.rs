//! Settlement facade: builds the engine components on one repository and clock.

use crate::config::Config;
use crate::db::{CommissionFilter, Repository, StatementFilter};
use crate::directory::{HttpUserDirectory, UserDirectory};
use crate::domain::{Commission, Money, PartnerStatement, ReferralCode, RewardTable, StatementStatus, UserId};
use crate::engine::{
    Clock, CommissionCalculator, EngineError, EventRecorder, PeriodManager, ReconciliationSweep,
    StatementAggregator, StatementWorkflow, SystemClock,
};
use serde::Serialize;
use std::sync::Arc;

/// Commissions shown in a partner's recent activity.
const RECENT_COMMISSIONS: i64 = 10;

/// Tunables the engine needs from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementOptions {
    pub rewards: RewardTable,
    pub click_min_dwell_ms: i64,
    pub click_expiry_ms: i64,
}

impl Default for SettlementOptions {
    fn default() -> Self {
        Self {
            rewards: RewardTable::default(),
            click_min_dwell_ms: 10_000,
            click_expiry_ms: 1_800_000,
        }
    }
}

impl From<&Config> for SettlementOptions {
    fn from(config: &Config) -> Self {
        Self {
            rewards: config.rewards,
            click_min_dwell_ms: config.click_min_dwell_ms,
            click_expiry_ms: config.click_expiry_ms,
        }
    }
}

/// Partner dashboard summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerEarnings {
    pub partner_id: UserId,
    pub referral_code: Option<ReferralCode>,
    /// PENDING and SUCCESS commissions of the OPEN period, not yet in any statement.
    pub pending_earnings: Money,
    pub total_paid: Money,
    pub lifetime_earned: Money,
    pub recent_commissions: Vec<Commission>,
    pub statements: Vec<PartnerStatement>,
}

#[derive(Clone)]
pub struct Settlement {
    repo: Arc<Repository>,
    recorder: EventRecorder,
    calculator: CommissionCalculator,
    periods: PeriodManager,
    aggregator: StatementAggregator,
    workflow: StatementWorkflow,
    sweep: ReconciliationSweep,
}

impl Settlement {
    pub fn new(
        repo: Arc<Repository>,
        options: SettlementOptions,
        directory: Option<Arc<dyn UserDirectory>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let aggregator = StatementAggregator::new(repo.clone(), clock.clone());
        let periods = PeriodManager::new(repo.clone(), aggregator.clone(), clock.clone());
        let calculator = CommissionCalculator::new(
            repo.clone(),
            periods.clone(),
            options.rewards,
            clock.clone(),
        );
        let recorder = EventRecorder::new(
            repo.clone(),
            calculator.clone(),
            clock.clone(),
            options.click_min_dwell_ms,
        );
        let workflow = StatementWorkflow::new(repo.clone(), clock.clone());
        let sweep = ReconciliationSweep::new(repo.clone(), directory, clock, options.click_expiry_ms);

        Self {
            repo,
            recorder,
            calculator,
            periods,
            aggregator,
            workflow,
            sweep,
        }
    }

    /// Production wiring: wall clock, HTTP directory when a URL is configured.
    pub fn from_config(repo: Arc<Repository>, config: &Config) -> Self {
        let directory = config
            .user_directory_url
            .clone()
            .map(|url| Arc::new(HttpUserDirectory::new(url)) as Arc<dyn UserDirectory>);
        Self::new(repo, config.into(), directory, Arc::new(SystemClock))
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn calculator(&self) -> &CommissionCalculator {
        &self.calculator
    }

    pub fn periods(&self) -> &PeriodManager {
        &self.periods
    }

    pub fn aggregator(&self) -> &StatementAggregator {
        &self.aggregator
    }

    pub fn workflow(&self) -> &StatementWorkflow {
        &self.workflow
    }

    pub fn sweep(&self) -> &ReconciliationSweep {
        &self.sweep
    }

    pub async fn partner_earnings(&self, partner_id: &UserId) -> Result<PartnerEarnings, EngineError> {
        let referral_code = self.repo.get_code_by_owner(partner_id).await?;
        let pending_earnings = self.repo.open_period_earnings(partner_id).await?;

        let statements = self
            .repo
            .list_statements(&StatementFilter {
                user_id: Some(partner_id.clone()),
                ..Default::default()
            })
            .await?;
        let lifetime_earned = Money::total(statements.iter().map(|s| s.total_earned))?;
        let total_paid = Money::total(
            statements
                .iter()
                .filter(|s| s.status == StatementStatus::Paid)
                .map(|s| s.total_earned),
        )?;

        let recent_commissions = self
            .repo
            .list_commissions(&CommissionFilter {
                partner_id: Some(partner_id.clone()),
                limit: Some(RECENT_COMMISSIONS),
                ..Default::default()
            })
            .await?;

        Ok(PartnerEarnings {
            partner_id: partner_id.clone(),
            referral_code,
            pending_earnings,
            total_paid,
            lifetime_earned,
            recent_commissions,
            statements,
        })
    }
}
