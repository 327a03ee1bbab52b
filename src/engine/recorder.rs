//! Event recorder: persists referral events and fires commission crediting on qualification.
//!
//! Every qualifying transition is a conditional UPDATE, and the commission is
//! credited in the same transaction only when that UPDATE changed a row. A
//! repeated call finds nothing to update and credits nothing.

use super::calculator::CommissionCalculator;
use super::clock::Clock;
use super::{EngineError, Entity};
use crate::db::Repository;
use crate::domain::{ReferralClick, ReferralCode, ReferralSignup, SourceType, UserId};
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct EventRecorder {
    repo: Arc<Repository>,
    calculator: CommissionCalculator,
    clock: Arc<dyn Clock>,
    min_dwell_ms: i64,
}

impl EventRecorder {
    pub fn new(
        repo: Arc<Repository>,
        calculator: CommissionCalculator,
        clock: Arc<dyn Clock>,
        min_dwell_ms: i64,
    ) -> Self {
        Self {
            repo,
            calculator,
            clock,
            min_dwell_ms,
        }
    }

    /// Create (or return) the referral code of a newly activated partner.
    pub async fn activate_partner(&self, owner_id: &UserId) -> Result<ReferralCode, EngineError> {
        if let Some(existing) = self.repo.get_code_by_owner(owner_id).await? {
            return Ok(existing);
        }

        // A generated code can collide with another owner's; retry with a new nonce.
        for _ in 0..5 {
            let code = ReferralCode {
                code: ReferralCode::generate(owner_id, &uuid::Uuid::new_v4()),
                owner_id: owner_id.clone(),
                created_at: self.clock.now(),
                active: true,
            };
            if self.repo.insert_code_if_absent(&code).await? {
                info!(partner = %owner_id, code = %code.code, "Referral code created");
                return Ok(code);
            }
            if let Some(existing) = self.repo.get_code_by_owner(owner_id).await? {
                return Ok(existing);
            }
        }
        Err(EngineError::not_found(Entity::Code, format!("free code for {owner_id}")))
    }

    pub async fn deactivate_code(&self, code: &str) -> Result<ReferralCode, EngineError> {
        let code = ReferralCode::normalize(code);
        if !self.repo.set_code_active(&code, false).await? {
            return Err(EngineError::CodeNotFound(code));
        }
        info!(code = %code, "Referral code deactivated");
        self.require_code(&code).await
    }

    async fn require_code(&self, code: &str) -> Result<ReferralCode, EngineError> {
        self.repo
            .get_code(code)
            .await?
            .ok_or_else(|| EngineError::CodeNotFound(code.to_string()))
    }

    async fn require_active_code(&self, code: &str) -> Result<ReferralCode, EngineError> {
        let code = self.require_code(&ReferralCode::normalize(code)).await?;
        if !code.active {
            return Err(EngineError::CodeInactive(code.code));
        }
        Ok(code)
    }

    /// Record a link visit. A repeated session id returns the existing click.
    pub async fn record_click_start(
        &self,
        code: &str,
        session_id: &str,
    ) -> Result<ReferralClick, EngineError> {
        let code = self.require_active_code(code).await?;
        let now = self.clock.now();

        if self
            .repo
            .insert_click_if_absent(&code.code, session_id, now)
            .await?
        {
            debug!(code = %code.code, session_id, "Click started");
        }

        let mut conn = self.repo.pool().acquire().await?;
        Repository::get_click_by_session(&mut conn, session_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Click, session_id))
    }

    /// Qualify a click after the dwell window and credit its partner.
    ///
    /// An already QUALIFIED or EXPIRED click, or one still inside the dwell
    /// window, is returned unchanged.
    pub async fn record_click_qualify(&self, session_id: &str) -> Result<ReferralClick, EngineError> {
        let now = self.clock.now();
        self.calculator.periods().get_or_create_open_period(now).await?;

        let mut tx = self.repo.begin().await?;
        let qualified = Repository::qualify_click(
            &mut tx,
            session_id,
            now,
            now.saturating_sub_ms(self.min_dwell_ms),
        )
        .await?;

        let click = Repository::get_click_by_session(&mut tx, session_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Click, session_id))?;

        if qualified {
            let owner = code_owner(&mut tx, &click.code).await?;
            self.calculator
                .credit_in(&mut tx, &owner, SourceType::Click, click.id, now)
                .await?;
            info!(session_id, click_id = click.id, partner = %owner, "Click qualified");
        } else {
            debug!(session_id, status = %click.status, "Click qualify ignored");
        }

        tx.commit().await?;
        Ok(click)
    }

    /// Attribute a vendor to a code. First write wins.
    pub async fn record_signup(
        &self,
        code: &str,
        vendor_id: &UserId,
    ) -> Result<ReferralSignup, EngineError> {
        let code = self.require_active_code(code).await?;
        if &code.owner_id == vendor_id {
            return Err(EngineError::SelfReferral(vendor_id.clone()));
        }

        let now = self.clock.now();
        self.calculator.periods().get_or_create_open_period(now).await?;

        let inserted = self
            .repo
            .insert_signup_if_absent(&code.code, vendor_id, now)
            .await?;

        let mut conn = self.repo.pool().acquire().await?;
        let signup = Repository::get_signup_by_vendor(&mut conn, vendor_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Signup, vendor_id))?;

        if !inserted {
            return Err(EngineError::DuplicateReferral {
                vendor: vendor_id.clone(),
                code: signup.code,
            });
        }

        info!(code = %code.code, vendor = %vendor_id, signup_id = signup.id, "Vendor signup recorded");
        Ok(signup)
    }

    /// The vendor account passed verification. `None` if the vendor was not referred.
    pub async fn record_vendor_qualified(
        &self,
        vendor_id: &UserId,
    ) -> Result<Option<ReferralSignup>, EngineError> {
        self.qualify_signup(vendor_id, SourceType::Signup).await
    }

    /// The vendor published their first active listing. `None` if the vendor was not referred.
    pub async fn record_first_listing(
        &self,
        vendor_id: &UserId,
    ) -> Result<Option<ReferralSignup>, EngineError> {
        self.qualify_signup(vendor_id, SourceType::Listing).await
    }

    async fn qualify_signup(
        &self,
        vendor_id: &UserId,
        source_type: SourceType,
    ) -> Result<Option<ReferralSignup>, EngineError> {
        let now = self.clock.now();
        self.calculator.periods().get_or_create_open_period(now).await?;

        let mut tx = self.repo.begin().await?;
        let transitioned = match source_type {
            SourceType::Listing => Repository::qualify_signup_listing(&mut tx, vendor_id, now).await?,
            _ => Repository::qualify_signup_account(&mut tx, vendor_id, now).await?,
        };

        let Some(signup) = Repository::get_signup_by_vendor(&mut tx, vendor_id).await? else {
            tx.rollback().await?;
            debug!(vendor = %vendor_id, "Vendor was not referred, ignoring");
            return Ok(None);
        };

        if transitioned {
            let owner = code_owner(&mut tx, &signup.code).await?;
            self.calculator
                .credit_in(&mut tx, &owner, source_type, signup.id, now)
                .await?;
            if Repository::mark_signup_activated(&mut tx, signup.id).await? {
                info!(vendor = %vendor_id, partner = %owner, "Referred vendor activated");
            }
            info!(vendor = %vendor_id, event = %source_type, "Referral qualified");
        } else {
            debug!(vendor = %vendor_id, event = %source_type, "Already qualified");
        }

        let signup = Repository::get_signup_by_vendor(&mut tx, vendor_id)
            .await?
            .unwrap_or(signup);
        tx.commit().await?;
        Ok(Some(signup))
    }

}

async fn code_owner(conn: &mut SqliteConnection, code: &str) -> Result<UserId, EngineError> {
    Repository::code_owner(conn, code)
        .await?
        .ok_or_else(|| EngineError::CodeNotFound(code.to_string()))
}
