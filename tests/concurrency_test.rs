//! Parallel callers racing on the same event, period or statement.

use futures::future::join_all;
use partner_payouts::db::{init_db, CommissionFilter};
use partner_payouts::engine::{EngineError, ManualClock};
use partner_payouts::orchestration::{Settlement, SettlementOptions};
use partner_payouts::{Money, PeriodStatus, Repository, TimeMs, UserId};
use std::sync::Arc;
use tempfile::TempDir;

// 2024-03-31 12:00 UTC
const MARCH_31: i64 = 1_711_886_400_000;

async fn setup() -> (Settlement, Arc<Repository>, Arc<ManualClock>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let clock = Arc::new(ManualClock::new(TimeMs::new(MARCH_31)));
    let settlement = Settlement::new(
        repo.clone(),
        SettlementOptions::default(),
        None,
        clock.clone(),
    );
    (settlement, repo, clock, temp_dir)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_click_qualify_creates_one_commission() {
    let (settlement, repo, clock, _temp) = setup().await;
    let code = settlement
        .recorder()
        .activate_partner(&UserId::new("p1"))
        .await
        .unwrap();
    settlement
        .recorder()
        .record_click_start(&code.code, "sess")
        .await
        .unwrap();
    clock.advance_ms(10_000);

    let results = join_all((0..16).map(|_| {
        let settlement = settlement.clone();
        async move { settlement.recorder().record_click_qualify("sess").await }
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let commissions = repo.list_commissions(&CommissionFilter::default()).await.unwrap();
    assert_eq!(commissions.len(), 1);
    assert_eq!(commissions[0].amount, Money::naira(15));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_signups_first_write_wins() {
    let (settlement, _repo, _clock, _temp) = setup().await;
    let mut codes = Vec::new();
    for i in 0..8 {
        codes.push(
            settlement
                .recorder()
                .activate_partner(&UserId::new(format!("p{i}")))
                .await
                .unwrap(),
        );
    }

    let vendor = UserId::new("contested");
    let results = join_all(codes.iter().map(|code| {
        let settlement = settlement.clone();
        let vendor = vendor.clone();
        let code = code.code.clone();
        async move { settlement.recorder().record_signup(&code, &vendor).await }
    }))
    .await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::DuplicateReferral { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(duplicates, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_vendor_qualification_credits_once() {
    let (settlement, repo, _clock, _temp) = setup().await;
    let code = settlement
        .recorder()
        .activate_partner(&UserId::new("p1"))
        .await
        .unwrap();
    let vendor = UserId::new("v1");
    settlement
        .recorder()
        .record_signup(&code.code, &vendor)
        .await
        .unwrap();

    let results = join_all((0..12).map(|i| {
        let settlement = settlement.clone();
        let vendor = vendor.clone();
        async move {
            if i % 2 == 0 {
                settlement.recorder().record_vendor_qualified(&vendor).await
            } else {
                settlement.recorder().record_first_listing(&vendor).await
            }
        }
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let commissions = repo.list_commissions(&CommissionFilter::default()).await.unwrap();
    assert_eq!(commissions.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_lock_is_idempotent() {
    let (settlement, repo, _clock, _temp) = setup().await;
    for i in 0..5 {
        settlement
            .calculator()
            .credit(&UserId::new(format!("p{i}")), partner_payouts::SourceType::Click, i)
            .await
            .unwrap();
    }

    let results = join_all((0..8).map(|_| {
        let settlement = settlement.clone();
        async move { settlement.periods().lock_current_month().await }
    }))
    .await;

    let periods: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(periods.iter().all(|p| p.id == periods[0].id));
    assert!(periods.iter().all(|p| p.status == PeriodStatus::Locked));

    let statements = repo.statements_for_period(periods[0].id).await.unwrap();
    assert_eq!(statements.len(), 5);

    let all_periods = repo.list_periods().await.unwrap();
    assert_eq!(all_periods.len(), 2);
    assert_eq!(
        all_periods
            .iter()
            .filter(|p| p.status == PeriodStatus::Open)
            .count(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_approve_and_pay_succeed_once() {
    let (settlement, repo, _clock, _temp) = setup().await;
    settlement
        .calculator()
        .credit(&UserId::new("p1"), partner_payouts::SourceType::Signup, 1)
        .await
        .unwrap();
    let period = settlement.periods().lock_current_month().await.unwrap();
    let statement_id = repo.statements_for_period(period.id).await.unwrap()[0].id;

    let approvals = join_all((0..6).map(|_| {
        let settlement = settlement.clone();
        async move { settlement.workflow().approve(statement_id).await }
    }))
    .await;
    assert_eq!(approvals.iter().filter(|r| r.is_ok()).count(), 1);

    let payments = join_all((0..6).map(|i| {
        let settlement = settlement.clone();
        async move {
            settlement
                .workflow()
                .mark_paid(statement_id, &format!("TRX-{i}"), None)
                .await
        }
    }))
    .await;
    assert_eq!(payments.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(payments
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, EngineError::InvalidTransition { .. })));

    let period = repo.get_period(period.id).await.unwrap().unwrap();
    assert_eq!(period.total_partners_paid, 1);
    assert_eq!(period.total_payout_amount, Money::naira(25));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_first_credits_open_one_period() {
    let (settlement, repo, _clock, _temp) = setup().await;

    let results = join_all((0..10).map(|i| {
        let settlement = settlement.clone();
        async move {
            settlement
                .calculator()
                .credit(&UserId::new("p1"), partner_payouts::SourceType::Click, i)
                .await
        }
    }))
    .await;
    let commissions: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();

    let periods = repo.list_periods().await.unwrap();
    assert_eq!(periods.len(), 1);
    assert!(commissions.iter().all(|c| c.period_id == periods[0].id));
}
