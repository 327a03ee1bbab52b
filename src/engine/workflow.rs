//! Statement workflow: DRAFT -> APPROVED -> PAID, plus the admin commission override.

use super::clock::Clock;
use super::{EngineError, Entity};
use crate::db::{CommissionFilter, Repository, StatementFilter};
use crate::domain::{Commission, CommissionStatus, PartnerStatement, StatementStatus};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct StatementWorkflow {
    repo: Arc<Repository>,
    clock: Arc<dyn Clock>,
}

impl StatementWorkflow {
    pub fn new(repo: Arc<Repository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn approve(&self, statement_id: i64) -> Result<PartnerStatement, EngineError> {
        if self.repo.approve_statement(statement_id, self.clock.now()).await? {
            info!(statement_id, "Statement approved");
            return self.get_statement(statement_id).await;
        }

        let current = self.get_statement(statement_id).await?;
        Err(EngineError::invalid_transition(
            Entity::Statement,
            statement_id,
            current.status,
            StatementStatus::Approved,
        ))
    }

    /// Record the payout of an APPROVED statement.
    ///
    /// The statement flip, the period's payout totals and the settlement of the
    /// partner's PENDING commissions commit together.
    pub async fn mark_paid(
        &self,
        statement_id: i64,
        payment_reference: &str,
        payment_method: Option<&str>,
    ) -> Result<PartnerStatement, EngineError> {
        let reference = payment_reference.trim();
        if reference.is_empty() {
            return Err(EngineError::MissingReference);
        }
        let method = payment_method.map(str::trim).filter(|m| !m.is_empty());
        let now = self.clock.now();

        let mut tx = self.repo.begin().await?;
        if !Repository::mark_statement_paid(&mut tx, statement_id, reference, now).await? {
            let current = Repository::get_statement_in(&mut tx, statement_id).await?;
            tx.rollback().await?;
            return Err(match current {
                None => EngineError::not_found(Entity::Statement, statement_id),
                Some(s) => EngineError::invalid_transition(
                    Entity::Statement,
                    statement_id,
                    s.status,
                    StatementStatus::Paid,
                ),
            });
        }

        let statement = Repository::get_statement_in(&mut tx, statement_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Statement, statement_id))?;
        Repository::add_period_payout(&mut tx, statement.period_id, statement.total_earned).await?;
        let settled = Repository::settle_commissions(
            &mut tx,
            statement.period_id,
            &statement.user_id,
            reference,
            method,
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            statement_id,
            partner = %statement.user_id,
            amount = %statement.total_earned,
            reference,
            settled,
            "Statement paid"
        );
        Ok(statement)
    }

    /// Admin override PENDING -> FAILED, only while the commission's period is OPEN.
    pub async fn fail_commission(&self, commission_id: i64) -> Result<Commission, EngineError> {
        if self.repo.fail_commission(commission_id).await? {
            warn!(commission_id, "Commission marked failed");
            return self.get_commission(commission_id).await;
        }

        let current = self.get_commission(commission_id).await?;
        let from = if current.status == CommissionStatus::Pending {
            // Still PENDING means the period has been locked.
            format!("{} (period {} locked)", current.status, current.period_id)
        } else {
            current.status.to_string()
        };
        Err(EngineError::invalid_transition(
            Entity::Commission,
            commission_id,
            from,
            CommissionStatus::Failed,
        ))
    }

    pub async fn get_statement(&self, statement_id: i64) -> Result<PartnerStatement, EngineError> {
        self.repo
            .get_statement(statement_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Statement, statement_id))
    }

    pub async fn list_statements(
        &self,
        filter: &StatementFilter,
    ) -> Result<Vec<PartnerStatement>, EngineError> {
        Ok(self.repo.list_statements(filter).await?)
    }

    pub async fn get_commission(&self, commission_id: i64) -> Result<Commission, EngineError> {
        self.repo
            .get_commission(commission_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Commission, commission_id))
    }

    pub async fn list_commissions(
        &self,
        filter: &CommissionFilter,
    ) -> Result<Vec<Commission>, EngineError> {
        Ok(self.repo.list_commissions(filter).await?)
    }
}
