//! Commission operations for the repository.

use crate::domain::{Commission, CommissionStatus, Money, SourceType, TimeMs, UserId};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{
    decode_error, get_money, get_opt_time, get_status, get_time, Repository, OPEN_PERIOD_ID,
};

const COMMISSION_COLUMNS: &str = "id, partner_id, source_type, source_id, amount, status, payment_method, payment_reference, paid_at_ms, created_at_ms, period_id";

fn commission_from_row(row: &SqliteRow) -> Result<Commission, sqlx::Error> {
    Ok(Commission {
        id: row.try_get("id")?,
        partner_id: UserId::new(row.try_get::<String, _>("partner_id")?),
        source_type: get_status(row, "source_type")?,
        source_id: row.try_get("source_id")?,
        amount: get_money(row, "amount")?,
        status: get_status(row, "status")?,
        payment_method: row.try_get("payment_method")?,
        payment_reference: row.try_get("payment_reference")?,
        paid_at: get_opt_time(row, "paid_at_ms")?,
        created_at: get_time(row, "created_at_ms")?,
        period_id: row.try_get("period_id")?,
    })
}

/// Admin listing filter. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct CommissionFilter {
    pub status: Option<CommissionStatus>,
    pub partner_id: Option<UserId>,
    pub period_id: Option<i64>,
    pub limit: Option<i64>,
}

/// A commission the reconciliation sweep may inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepCandidate {
    pub id: i64,
    pub partner_id: UserId,
    pub source_type: SourceType,
    pub source_id: i64,
}

fn candidate_from_row(row: &SqliteRow) -> Result<SweepCandidate, sqlx::Error> {
    Ok(SweepCandidate {
        id: row.try_get("id")?,
        partner_id: UserId::new(row.try_get::<String, _>("partner_id")?),
        source_type: get_status(row, "source_type")?,
        source_id: row.try_get("source_id")?,
    })
}

impl Repository {
    /// Insert a PENDING commission for the OPEN period unless one already
    /// exists for `(source_type, source_id)`.
    ///
    /// Returns whether a row was inserted. Fails if no period is OPEN.
    pub async fn insert_commission_if_absent(
        conn: &mut SqliteConnection,
        partner_id: &UserId,
        source_type: SourceType,
        source_id: i64,
        amount: Money,
        created_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO commissions
                (partner_id, source_type, source_id, amount, status, created_at_ms, period_id)
            VALUES (?, ?, ?, ?, 'PENDING', ?, {OPEN_PERIOD_ID})
            ON CONFLICT(source_type, source_id) DO NOTHING
            "#
        );
        let result = sqlx::query(&sql)
            .bind(partner_id.as_str())
            .bind(source_type.as_str())
            .bind(source_id)
            .bind(amount.to_canonical_string())
            .bind(created_at.as_ms())
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_commission_by_source(
        conn: &mut SqliteConnection,
        source_type: SourceType,
        source_id: i64,
    ) -> Result<Option<Commission>, sqlx::Error> {
        let sql = format!(
            "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE source_type = ? AND source_id = ?"
        );
        sqlx::query(&sql)
            .bind(source_type.as_str())
            .bind(source_id)
            .fetch_optional(&mut *conn)
            .await?
            .as_ref()
            .map(commission_from_row)
            .transpose()
    }

    pub async fn get_commission(&self, id: i64) -> Result<Option<Commission>, sqlx::Error> {
        let sql = format!("SELECT {COMMISSION_COLUMNS} FROM commissions WHERE id = ?");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(commission_from_row)
            .transpose()
    }

    /// Commissions matching `filter`, newest first.
    pub async fn list_commissions(
        &self,
        filter: &CommissionFilter,
    ) -> Result<Vec<Commission>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE 1 = 1"
        ));
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(partner_id) = &filter.partner_id {
            qb.push(" AND partner_id = ").push_bind(partner_id.as_str().to_string());
        }
        if let Some(period_id) = filter.period_id {
            qb.push(" AND period_id = ").push_bind(period_id);
        }
        qb.push(" ORDER BY created_at_ms DESC, id DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(commission_from_row).collect()
    }

    /// Every commission stamped with a period, in insertion order.
    pub async fn commissions_for_period(
        conn: &mut SqliteConnection,
        period_id: i64,
    ) -> Result<Vec<Commission>, sqlx::Error> {
        let sql = format!(
            "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE period_id = ? ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(period_id)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(commission_from_row).collect()
    }

    /// PENDING -> FAILED, only while the commission's period is still OPEN.
    pub async fn fail_commission(&self, id: i64) -> Result<bool, sqlx::Error> {
        let sql = format!(
            "UPDATE commissions SET status = 'FAILED' WHERE id = ? AND status = 'PENDING' AND period_id = {OPEN_PERIOD_ID}"
        );
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Flip a partner's PENDING commissions in a period to SUCCESS.
    pub async fn settle_commissions(
        conn: &mut SqliteConnection,
        period_id: i64,
        partner_id: &UserId,
        payment_reference: &str,
        payment_method: Option<&str>,
        paid_at: TimeMs,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE commissions
            SET status = 'SUCCESS', payment_reference = ?, payment_method = ?, paid_at_ms = ?
            WHERE period_id = ? AND partner_id = ? AND status = 'PENDING'
            "#,
        )
        .bind(payment_reference)
        .bind(payment_method)
        .bind(paid_at.as_ms())
        .bind(period_id)
        .bind(partner_id.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Commissions still in the OPEN period, i.e. not yet folded into a statement.
    pub async fn sweepable_commissions(&self) -> Result<Vec<SweepCandidate>, sqlx::Error> {
        let sql = format!(
            "SELECT id, partner_id, source_type, source_id FROM commissions WHERE period_id = {OPEN_PERIOD_ID} ORDER BY id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(candidate_from_row).collect()
    }

    /// OPEN-period SIGNUP/LISTING commissions whose signup row is gone.
    pub async fn commissions_with_missing_signup(
        &self,
    ) -> Result<Vec<SweepCandidate>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT c.id, c.partner_id, c.source_type, c.source_id
            FROM commissions c
            LEFT JOIN referral_signups s ON s.id = c.source_id
            WHERE c.source_type IN ('SIGNUP', 'LISTING')
              AND s.id IS NULL
              AND c.period_id = {OPEN_PERIOD_ID}
            ORDER BY c.id
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(candidate_from_row).collect()
    }

    /// OPEN-period SIGNUP/LISTING commissions paired with the vendor of their
    /// signup. The signup itself may sit in any period.
    pub async fn sweepable_commissions_with_vendor(
        &self,
    ) -> Result<Vec<(SweepCandidate, UserId)>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT c.id, c.partner_id, c.source_type, c.source_id, s.vendor_id
            FROM commissions c
            JOIN referral_signups s ON s.id = c.source_id
            WHERE c.source_type IN ('SIGNUP', 'LISTING')
              AND c.period_id = {OPEN_PERIOD_ID}
            ORDER BY c.id
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok((
                    candidate_from_row(row)?,
                    UserId::new(row.try_get::<String, _>("vendor_id")?),
                ))
            })
            .collect()
    }

    /// Delete a commission only if it still belongs to the OPEN period.
    pub async fn delete_sweepable_commission(&self, id: i64) -> Result<bool, sqlx::Error> {
        let sql = format!("DELETE FROM commissions WHERE id = ? AND period_id = {OPEN_PERIOD_ID}");
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Payable (PENDING or SUCCESS) commissions of a partner in the OPEN period.
    pub async fn open_period_earnings(&self, partner_id: &UserId) -> Result<Money, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT amount FROM commissions
            WHERE partner_id = ? AND status IN ('PENDING', 'SUCCESS') AND period_id = {OPEN_PERIOD_ID}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(partner_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut total = Money::zero();
        for row in &rows {
            total = total.checked_add(get_money(row, "amount")?).map_err(decode_error)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;
    use crate::domain::MonthKey;

    async fn setup_with_open_period() -> (Repository, tempfile::TempDir) {
        let (repo, temp) = setup_test_db().await;
        repo.insert_open_period_if_absent(MonthKey::new(2024, 3).unwrap())
            .await
            .unwrap();
        (repo, temp)
    }

    #[tokio::test]
    async fn test_insert_commission_is_idempotent_per_source() {
        let (repo, _temp) = setup_with_open_period().await;
        let partner = UserId::new("p1");
        let mut conn = repo.pool().acquire().await.unwrap();

        let first = Repository::insert_commission_if_absent(
            &mut conn,
            &partner,
            SourceType::Click,
            1,
            Money::naira(15),
            TimeMs::new(10),
        )
        .await
        .unwrap();
        let second = Repository::insert_commission_if_absent(
            &mut conn,
            &partner,
            SourceType::Click,
            1,
            Money::naira(99),
            TimeMs::new(20),
        )
        .await
        .unwrap();
        assert!(first);
        assert!(!second);

        let stored = Repository::get_commission_by_source(&mut conn, SourceType::Click, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.amount, Money::naira(15));
        assert_eq!(stored.status, CommissionStatus::Pending);

        // Same source id under a different type is a different event.
        assert!(Repository::insert_commission_if_absent(
            &mut conn,
            &partner,
            SourceType::Signup,
            1,
            Money::naira(25),
            TimeMs::new(30),
        )
        .await
        .unwrap());
    }

    #[tokio::test]
    async fn test_insert_commission_without_open_period_fails() {
        let (repo, _temp) = setup_test_db().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        let result = Repository::insert_commission_if_absent(
            &mut conn,
            &UserId::new("p1"),
            SourceType::Click,
            1,
            Money::naira(15),
            TimeMs::new(10),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_commissions_filters() {
        let (repo, _temp) = setup_with_open_period().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        for (partner, source_id) in [("p1", 1), ("p1", 2), ("p2", 3)] {
            Repository::insert_commission_if_absent(
                &mut conn,
                &UserId::new(partner),
                SourceType::Click,
                source_id,
                Money::naira(15),
                TimeMs::new(source_id),
            )
            .await
            .unwrap();
        }
        drop(conn);

        let p1 = repo
            .list_commissions(&CommissionFilter {
                partner_id: Some(UserId::new("p1")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(p1.len(), 2);
        assert_eq!(p1[0].source_id, 2, "newest first");

        let limited = repo
            .list_commissions(&CommissionFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let failed = repo
            .list_commissions(&CommissionFilter {
                status: Some(CommissionStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn test_open_period_earnings_excludes_failed() {
        let (repo, _temp) = setup_with_open_period().await;
        let partner = UserId::new("p1");
        let mut conn = repo.pool().acquire().await.unwrap();
        for source_id in [1, 2] {
            Repository::insert_commission_if_absent(
                &mut conn,
                &partner,
                SourceType::Click,
                source_id,
                Money::naira(15),
                TimeMs::new(source_id),
            )
            .await
            .unwrap();
        }
        drop(conn);

        let first = repo
            .list_commissions(&CommissionFilter::default())
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert!(repo.fail_commission(first.id).await.unwrap());
        assert!(!repo.fail_commission(first.id).await.unwrap());

        assert_eq!(repo.open_period_earnings(&partner).await.unwrap(), Money::naira(15));
    }
}
