//! Payout period operations for the repository.

use crate::domain::{Money, MonthKey, PayoutPeriod, TimeMs};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{decode_error, get_money, get_opt_time, get_status, get_time, Repository};

const PERIOD_COLUMNS: &str = "id, year, month, status, total_payout_amount, total_partners_paid, start_ms, end_ms, locked_at_ms, aggregated_at_ms";

fn period_from_row(row: &SqliteRow) -> Result<PayoutPeriod, sqlx::Error> {
    Ok(PayoutPeriod {
        id: row.try_get("id")?,
        year: row.try_get("year")?,
        month: row.try_get::<i64, _>("month")? as u32,
        status: get_status(row, "status")?,
        total_payout_amount: get_money(row, "total_payout_amount")?,
        total_partners_paid: row.try_get("total_partners_paid")?,
        start_date: get_time(row, "start_ms")?,
        end_date: get_time(row, "end_ms")?,
        locked_at: get_opt_time(row, "locked_at_ms")?,
        aggregated_at: get_opt_time(row, "aggregated_at_ms")?,
    })
}

async fn insert_open_period(
    conn: &mut SqliteConnection,
    month: MonthKey,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO payout_periods (year, month, status, start_ms, end_ms)
        VALUES (?, ?, 'OPEN', ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(month.year)
    .bind(month.month as i64)
    .bind(month.start_ms().as_ms())
    .bind(month.end_ms().as_ms())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

impl Repository {
    /// Insert an OPEN period for `month`.
    ///
    /// Ignored when that month already exists or another period is OPEN
    /// (the partial unique index allows a single OPEN row).
    pub async fn insert_open_period_if_absent(&self, month: MonthKey) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_open_period(&mut conn, month).await
    }

    pub async fn get_open_period(&self) -> Result<Option<PayoutPeriod>, sqlx::Error> {
        let sql = format!("SELECT {PERIOD_COLUMNS} FROM payout_periods WHERE status = 'OPEN'");
        sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(period_from_row)
            .transpose()
    }

    pub async fn get_period(&self, period_id: i64) -> Result<Option<PayoutPeriod>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::get_period_in(&mut conn, period_id).await
    }

    pub async fn get_period_in(
        conn: &mut SqliteConnection,
        period_id: i64,
    ) -> Result<Option<PayoutPeriod>, sqlx::Error> {
        let sql = format!("SELECT {PERIOD_COLUMNS} FROM payout_periods WHERE id = ?");
        sqlx::query(&sql)
            .bind(period_id)
            .fetch_optional(&mut *conn)
            .await?
            .as_ref()
            .map(period_from_row)
            .transpose()
    }

    pub async fn get_period_by_month(
        &self,
        month: MonthKey,
    ) -> Result<Option<PayoutPeriod>, sqlx::Error> {
        let sql =
            format!("SELECT {PERIOD_COLUMNS} FROM payout_periods WHERE year = ? AND month = ?");
        sqlx::query(&sql)
            .bind(month.year)
            .bind(month.month as i64)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(period_from_row)
            .transpose()
    }

    /// The period with the latest month, whatever its status.
    pub async fn latest_period(&self) -> Result<Option<PayoutPeriod>, sqlx::Error> {
        let sql = format!(
            "SELECT {PERIOD_COLUMNS} FROM payout_periods ORDER BY year DESC, month DESC LIMIT 1"
        );
        sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(period_from_row)
            .transpose()
    }

    /// All periods, newest first.
    pub async fn list_periods(&self) -> Result<Vec<PayoutPeriod>, sqlx::Error> {
        let sql =
            format!("SELECT {PERIOD_COLUMNS} FROM payout_periods ORDER BY year DESC, month DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(period_from_row).collect()
    }

    /// LOCKED periods whose statements were never written.
    pub async fn periods_pending_aggregation(&self) -> Result<Vec<PayoutPeriod>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {PERIOD_COLUMNS} FROM payout_periods
            WHERE status = 'LOCKED' AND aggregated_at_ms IS NULL
            ORDER BY year ASC, month ASC
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(period_from_row).collect()
    }

    /// OPEN -> LOCKED, then open the following month.
    ///
    /// Both writes share the caller's transaction so an OPEN period exists
    /// at every commit point. Returns whether this call performed the lock.
    pub async fn lock_period_and_open_next(
        conn: &mut SqliteConnection,
        period_id: i64,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE payout_periods SET status = 'LOCKED', locked_at_ms = ? WHERE id = ? AND status = 'OPEN'",
        )
        .bind(now.as_ms())
        .bind(period_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() != 1 {
            return Ok(false);
        }

        if let Some(locked) = Self::get_period_in(conn, period_id).await? {
            insert_open_period(conn, locked.month_key().next()).await?;
        }
        Ok(true)
    }

    /// Claim a LOCKED period for aggregation.
    ///
    /// Succeeds once per period, and never for a period that already has statements.
    pub async fn claim_aggregation(
        conn: &mut SqliteConnection,
        period_id: i64,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payout_periods SET aggregated_at_ms = ?
            WHERE id = ? AND status = 'LOCKED' AND aggregated_at_ms IS NULL
              AND NOT EXISTS (SELECT 1 FROM partner_statements WHERE period_id = ?)
            "#,
        )
        .bind(now.as_ms())
        .bind(period_id)
        .bind(period_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Add one paid statement to the period's running totals.
    pub async fn add_period_payout(
        conn: &mut SqliteConnection,
        period_id: i64,
        amount: Money,
    ) -> Result<(), sqlx::Error> {
        let row = sqlx::query("SELECT total_payout_amount FROM payout_periods WHERE id = ?")
            .bind(period_id)
            .fetch_one(&mut *conn)
            .await?;
        let total = get_money(&row, "total_payout_amount")?
            .checked_add(amount)
            .map_err(decode_error)?;

        sqlx::query(
            r#"
            UPDATE payout_periods
            SET total_payout_amount = ?, total_partners_paid = total_partners_paid + 1
            WHERE id = ?
            "#,
        )
        .bind(total.to_canonical_string())
        .bind(period_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
