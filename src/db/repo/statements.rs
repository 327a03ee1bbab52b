//! Partner statement operations for the repository.

use crate::domain::{NewStatement, PartnerStatement, StatementStatus, TimeMs, UserId};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{get_money, get_opt_time, get_status, get_time, Repository};

const STATEMENT_COLUMNS: &str = "id, period_id, user_id, total_earned, status, vendors_referred_count, vendors_activated_count, clicks_count, payment_reference, created_at_ms, approved_at_ms, paid_at_ms";

fn statement_from_row(row: &SqliteRow) -> Result<PartnerStatement, sqlx::Error> {
    Ok(PartnerStatement {
        id: row.try_get("id")?,
        period_id: row.try_get("period_id")?,
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
        total_earned: get_money(row, "total_earned")?,
        status: get_status(row, "status")?,
        vendors_referred_count: row.try_get("vendors_referred_count")?,
        vendors_activated_count: row.try_get("vendors_activated_count")?,
        clicks_count: row.try_get("clicks_count")?,
        payment_reference: row.try_get("payment_reference")?,
        created_at: get_time(row, "created_at_ms")?,
        approved_at: get_opt_time(row, "approved_at_ms")?,
        paid_at: get_opt_time(row, "paid_at_ms")?,
    })
}

/// Admin listing filter. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct StatementFilter {
    pub status: Option<StatementStatus>,
    pub user_id: Option<UserId>,
    pub period_id: Option<i64>,
}

impl Repository {
    /// Write DRAFT statements for a period. `(period_id, user_id)` duplicates are skipped.
    pub async fn insert_statements(
        conn: &mut SqliteConnection,
        period_id: i64,
        statements: &[NewStatement],
        created_at: TimeMs,
    ) -> Result<usize, sqlx::Error> {
        let mut inserted = 0usize;
        for statement in statements {
            let result = sqlx::query(
                r#"
                INSERT INTO partner_statements
                    (period_id, user_id, total_earned, status, vendors_referred_count,
                     vendors_activated_count, clicks_count, created_at_ms)
                VALUES (?, ?, ?, 'DRAFT', ?, ?, ?, ?)
                ON CONFLICT(period_id, user_id) DO NOTHING
                "#,
            )
            .bind(period_id)
            .bind(statement.user_id.as_str())
            .bind(statement.total_earned.to_canonical_string())
            .bind(statement.vendors_referred_count)
            .bind(statement.vendors_activated_count)
            .bind(statement.clicks_count)
            .bind(created_at.as_ms())
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub async fn get_statement(&self, id: i64) -> Result<Option<PartnerStatement>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::get_statement_in(&mut conn, id).await
    }

    pub async fn get_statement_in(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<PartnerStatement>, sqlx::Error> {
        let sql = format!("SELECT {STATEMENT_COLUMNS} FROM partner_statements WHERE id = ?");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .as_ref()
            .map(statement_from_row)
            .transpose()
    }

    /// Statements matching `filter`, ordered by period then partner.
    pub async fn list_statements(
        &self,
        filter: &StatementFilter,
    ) -> Result<Vec<PartnerStatement>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {STATEMENT_COLUMNS} FROM partner_statements WHERE 1 = 1"
        ));
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.as_str().to_string());
        }
        if let Some(period_id) = filter.period_id {
            qb.push(" AND period_id = ").push_bind(period_id);
        }
        qb.push(" ORDER BY period_id DESC, user_id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(statement_from_row).collect()
    }

    pub async fn statements_for_period(
        &self,
        period_id: i64,
    ) -> Result<Vec<PartnerStatement>, sqlx::Error> {
        self.list_statements(&StatementFilter {
            period_id: Some(period_id),
            ..Default::default()
        })
        .await
    }

    /// DRAFT -> APPROVED. Returns whether this call made the transition.
    pub async fn approve_statement(&self, id: i64, now: TimeMs) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE partner_statements SET status = 'APPROVED', approved_at_ms = ? WHERE id = ? AND status = 'DRAFT'",
        )
        .bind(now.as_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// APPROVED -> PAID. Returns whether this call made the transition.
    pub async fn mark_statement_paid(
        conn: &mut SqliteConnection,
        id: i64,
        payment_reference: &str,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE partner_statements
            SET status = 'PAID', payment_reference = ?, paid_at_ms = ?
            WHERE id = ? AND status = 'APPROVED'
            "#,
        )
        .bind(payment_reference)
        .bind(now.as_ms())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
