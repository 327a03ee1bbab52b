//! Reconciliation sweep: removes OPEN-period rows whose users no longer exist.
//!
//! Only signups and commissions stamped with the OPEN period are deleted.
//! Anything in a LOCKED period is already part of a statement snapshot, and
//! statements themselves are never touched. A commission's vendor is checked
//! through its signup even when that signup belongs to a LOCKED period.

use super::clock::Clock;
use super::{EngineError, Entity};
use crate::db::{Repository, SweepCandidate};
use crate::directory::UserDirectory;
use crate::domain::{ReferralSignup, UserId};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Concurrent directory lookups per sweep.
const LOOKUP_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrphanReason {
    VendorMissing,
    PartnerMissing,
    SourceMissing,
}

/// A row the sweep found dangling. Reported, never returned as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedReference {
    pub entity: Entity,
    pub id: i64,
    pub user_id: Option<UserId>,
    pub reason: OrphanReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub deleted_signups: u64,
    pub deleted_commissions: u64,
    pub expired_clicks: u64,
    pub orphans: Vec<OrphanedReference>,
    /// Users the directory could not answer for; their rows were kept.
    pub unresolved_users: usize,
}

#[derive(Clone)]
pub struct ReconciliationSweep {
    repo: Arc<Repository>,
    directory: Option<Arc<dyn UserDirectory>>,
    clock: Arc<dyn Clock>,
    click_expiry_ms: i64,
}

impl ReconciliationSweep {
    pub fn new(
        repo: Arc<Repository>,
        directory: Option<Arc<dyn UserDirectory>>,
        clock: Arc<dyn Clock>,
        click_expiry_ms: i64,
    ) -> Self {
        Self {
            repo,
            directory,
            clock,
            click_expiry_ms,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport {
            expired_clicks: self
                .repo
                .expire_clicks_started_before(self.clock.now().saturating_sub_ms(self.click_expiry_ms))
                .await?,
            ..Default::default()
        };

        if let Some(directory) = &self.directory {
            self.sweep_missing_users(directory.as_ref(), &mut report).await?;
        } else {
            debug!("No user directory configured, skipping orphan detection");
        }

        // Includes commissions whose signup was deleted just above.
        for candidate in self.repo.commissions_with_missing_signup().await? {
            if self.repo.delete_sweepable_commission(candidate.id).await? {
                report.deleted_commissions += 1;
                report.orphans.push(commission_orphan(
                    &candidate,
                    &candidate.partner_id,
                    OrphanReason::SourceMissing,
                ));
            }
        }

        if report.deleted_signups > 0 || report.deleted_commissions > 0 {
            info!(
                deleted_signups = report.deleted_signups,
                deleted_commissions = report.deleted_commissions,
                expired_clicks = report.expired_clicks,
                "Reconciliation sweep removed orphans"
            );
        } else {
            debug!(expired_clicks = report.expired_clicks, "Reconciliation sweep found nothing to remove");
        }
        Ok(report)
    }

    async fn sweep_missing_users(
        &self,
        directory: &dyn UserDirectory,
        report: &mut SweepReport,
    ) -> Result<(), EngineError> {
        let signups = self.repo.sweepable_signups().await?;
        let commissions = self.repo.sweepable_commissions().await?;
        let vendor_commissions = self.repo.sweepable_commissions_with_vendor().await?;

        let mut owners: HashMap<String, UserId> = HashMap::new();
        for signup in &signups {
            if !owners.contains_key(&signup.code) {
                if let Some(code) = self.repo.get_code(&signup.code).await? {
                    owners.insert(signup.code.clone(), code.owner_id);
                }
            }
        }

        let mut users: BTreeSet<UserId> = BTreeSet::new();
        users.extend(signups.iter().map(|s| s.vendor_id.clone()));
        users.extend(owners.values().cloned());
        users.extend(commissions.iter().map(|c| c.partner_id.clone()));
        users.extend(vendor_commissions.iter().map(|(_, vendor)| vendor.clone()));

        let lookups: Vec<(UserId, Result<bool, _>)> = stream::iter(users)
            .map(|user| async move {
                let exists = directory.user_exists(&user).await;
                (user, exists)
            })
            .buffer_unordered(LOOKUP_CONCURRENCY)
            .collect()
            .await;

        let mut missing: BTreeSet<UserId> = BTreeSet::new();
        for (user, result) in lookups {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    missing.insert(user);
                }
                Err(e) => {
                    warn!(user = %user, error = %e, "User lookup failed, keeping rows");
                    report.unresolved_users += 1;
                }
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        for signup in &signups {
            let Some(reason) = signup_orphan_reason(signup, owners.get(&signup.code), &missing) else {
                continue;
            };
            if self.repo.delete_sweepable_signup(signup.id).await? {
                report.deleted_signups += 1;
                report.orphans.push(OrphanedReference {
                    entity: Entity::Signup,
                    id: signup.id,
                    user_id: Some(match reason {
                        OrphanReason::VendorMissing => signup.vendor_id.clone(),
                        _ => owners
                            .get(&signup.code)
                            .cloned()
                            .unwrap_or_else(|| signup.vendor_id.clone()),
                    }),
                    reason,
                });
            }
        }

        for (candidate, vendor) in vendor_commissions.iter().filter(|(_, v)| missing.contains(v)) {
            if self.repo.delete_sweepable_commission(candidate.id).await? {
                report.deleted_commissions += 1;
                report.orphans.push(commission_orphan(candidate, vendor, OrphanReason::VendorMissing));
            }
        }

        for candidate in commissions.iter().filter(|c| missing.contains(&c.partner_id)) {
            if self.repo.delete_sweepable_commission(candidate.id).await? {
                report.deleted_commissions += 1;
                report.orphans.push(commission_orphan(
                    candidate,
                    &candidate.partner_id,
                    OrphanReason::PartnerMissing,
                ));
            }
        }
        Ok(())
    }
}

fn signup_orphan_reason(
    signup: &ReferralSignup,
    owner: Option<&UserId>,
    missing: &BTreeSet<UserId>,
) -> Option<OrphanReason> {
    if missing.contains(&signup.vendor_id) {
        Some(OrphanReason::VendorMissing)
    } else if owner.is_some_and(|o| missing.contains(o)) {
        Some(OrphanReason::PartnerMissing)
    } else {
        None
    }
}

fn commission_orphan(
    candidate: &SweepCandidate,
    user: &UserId,
    reason: OrphanReason,
) -> OrphanedReference {
    OrphanedReference {
        entity: Entity::Commission,
        id: candidate.id,
        user_id: Some(user.clone()),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_db;
    use crate::db::{CommissionFilter, StatementFilter};
    use crate::directory::MockUserDirectory;
    use crate::domain::{ClickStatus, RewardTable, TimeMs};
    use crate::engine::aggregator::StatementAggregator;
    use crate::engine::calculator::CommissionCalculator;
    use crate::engine::clock::ManualClock;
    use crate::engine::periods::PeriodManager;
    use crate::engine::recorder::EventRecorder;

    struct Fixture {
        recorder: EventRecorder,
        periods: PeriodManager,
        repo: Arc<Repository>,
        clock: Arc<ManualClock>,
        _temp: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let (repo, temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        // 2024-03-05 12:00 UTC
        let clock = Arc::new(ManualClock::new(TimeMs::new(1_709_640_000_000)));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let aggregator = StatementAggregator::new(repo.clone(), dyn_clock.clone());
        let periods = PeriodManager::new(repo.clone(), aggregator, dyn_clock.clone());
        let calculator = CommissionCalculator::new(
            repo.clone(),
            periods.clone(),
            RewardTable::default(),
            dyn_clock.clone(),
        );
        Fixture {
            recorder: EventRecorder::new(repo.clone(), calculator, dyn_clock, 10_000),
            periods,
            repo,
            clock,
            _temp: temp,
        }
    }

    fn sweeper(f: &Fixture, directory: Option<Arc<dyn UserDirectory>>) -> ReconciliationSweep {
        ReconciliationSweep::new(f.repo.clone(), directory, f.clock.clone(), 1_800_000)
    }

    async fn refer(f: &Fixture, partner: &str, vendor: &str) {
        let code = f.recorder.activate_partner(&UserId::new(partner)).await.unwrap();
        let vendor = UserId::new(vendor);
        f.recorder.record_signup(&code.code, &vendor).await.unwrap();
        f.recorder.record_vendor_qualified(&vendor).await.unwrap();
    }

    #[tokio::test]
    async fn test_deleted_vendor_removes_signup_and_commission() {
        let f = fixture().await;
        refer(&f, "p1", "v1").await;
        refer(&f, "p1", "v2").await;

        let directory = MockUserDirectory::new();
        directory.delete_user(&UserId::new("v1"));
        let report = sweeper(&f, Some(Arc::new(directory))).sweep().await.unwrap();

        assert_eq!(report.deleted_signups, 1);
        assert_eq!(report.deleted_commissions, 1);
        assert!(report
            .orphans
            .iter()
            .any(|o| o.reason == OrphanReason::VendorMissing));
        assert!(report.orphans.iter().all(|o| o.reason == OrphanReason::VendorMissing));
        assert!(report
            .orphans
            .iter()
            .any(|o| o.entity == Entity::Commission && o.user_id == Some(UserId::new("v1"))));

        let remaining = f.repo.list_commissions(&CommissionFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_locked_period_rows_and_statements_survive() {
        let f = fixture().await;
        refer(&f, "p1", "v1").await;
        f.clock.set(TimeMs::new(1_711_886_400_000)); // 2024-03-31
        f.periods.lock_current_month().await.unwrap();

        let directory = MockUserDirectory::new();
        directory.delete_user(&UserId::new("v1"));
        directory.delete_user(&UserId::new("p1"));
        let report = sweeper(&f, Some(Arc::new(directory))).sweep().await.unwrap();

        assert_eq!(report.deleted_signups, 0);
        assert_eq!(report.deleted_commissions, 0);
        let statements = f.repo.list_statements(&StatementFilter::default()).await.unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].total_earned, crate::domain::Money::naira(25));
    }

    #[tokio::test]
    async fn test_open_commission_of_deleted_vendor_with_locked_signup_is_removed() {
        let f = fixture().await;
        refer(&f, "p1", "v1").await;
        f.clock.set(TimeMs::new(1_711_886_400_000)); // 2024-03-31
        let march = f.periods.lock_current_month().await.unwrap();

        f.clock.set(TimeMs::new(1_712_145_600_000)); // 2024-04-03
        let vendor = UserId::new("v1");
        f.recorder.record_first_listing(&vendor).await.unwrap();

        let directory = MockUserDirectory::new();
        directory.delete_user(&vendor);
        let report = sweeper(&f, Some(Arc::new(directory))).sweep().await.unwrap();

        assert_eq!(report.deleted_signups, 0, "signup belongs to a locked period");
        assert_eq!(report.deleted_commissions, 1);
        assert_eq!(
            report.orphans,
            vec![OrphanedReference {
                entity: Entity::Commission,
                id: report.orphans[0].id,
                user_id: Some(vendor.clone()),
                reason: OrphanReason::VendorMissing,
            }]
        );

        let remaining = f.repo.list_commissions(&CommissionFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].period_id, march.id);
    }

    #[tokio::test]
    async fn test_directory_errors_keep_rows() {
        let f = fixture().await;
        refer(&f, "p1", "v1").await;

        let directory = MockUserDirectory::new().with_unavailable(UserId::new("v1"));
        let report = sweeper(&f, Some(Arc::new(directory))).sweep().await.unwrap();

        assert_eq!(report.unresolved_users, 1);
        assert_eq!(report.deleted_signups, 0);
        assert_eq!(report.deleted_commissions, 0);
    }

    #[tokio::test]
    async fn test_stale_clicks_expire_without_directory() {
        let f = fixture().await;
        let code = f.recorder.activate_partner(&UserId::new("p1")).await.unwrap();
        f.recorder.record_click_start(&code.code, "old").await.unwrap();
        f.clock.advance_ms(1_800_001);
        f.recorder.record_click_start(&code.code, "fresh").await.unwrap();

        let report = sweeper(&f, None).sweep().await.unwrap();
        assert_eq!(report.expired_clicks, 1);

        let click = f.recorder.record_click_qualify("old").await.unwrap();
        assert_eq!(click.status, ClickStatus::Expired);
    }
}
