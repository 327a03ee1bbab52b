//! Referral code, click and signup operations for the repository.

use crate::domain::{ReferralClick, ReferralCode, ReferralSignup, TimeMs, UserId};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{get_opt_time, get_status, get_time, Repository, OPEN_PERIOD_ID};

fn code_from_row(row: &SqliteRow) -> Result<ReferralCode, sqlx::Error> {
    Ok(ReferralCode {
        code: row.try_get("code")?,
        owner_id: UserId::new(row.try_get::<String, _>("owner_id")?),
        created_at: get_time(row, "created_at_ms")?,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}

fn click_from_row(row: &SqliteRow) -> Result<ReferralClick, sqlx::Error> {
    Ok(ReferralClick {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        session_id: row.try_get("session_id")?,
        status: get_status(row, "status")?,
        started_at: get_time(row, "started_at_ms")?,
        qualified_at: get_opt_time(row, "qualified_at_ms")?,
        period_id: row.try_get("period_id")?,
    })
}

fn signup_from_row(row: &SqliteRow) -> Result<ReferralSignup, sqlx::Error> {
    Ok(ReferralSignup {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        vendor_id: UserId::new(row.try_get::<String, _>("vendor_id")?),
        signup_status: get_status(row, "signup_status")?,
        listing_status: get_status(row, "listing_status")?,
        created_at: get_time(row, "created_at_ms")?,
        period_id: row.try_get("period_id")?,
        activated_period_id: row.try_get("activated_period_id")?,
    })
}

const SIGNUP_COLUMNS: &str = "id, code, vendor_id, signup_status, listing_status, created_at_ms, period_id, activated_period_id";

impl Repository {
    // =========================================================================
    // Referral codes
    // =========================================================================

    /// Insert a code unless the code string or the owner already has one.
    pub async fn insert_code_if_absent(&self, code: &ReferralCode) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO referral_codes (code, owner_id, created_at_ms, active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&code.code)
        .bind(code.owner_id.as_str())
        .bind(code.created_at.as_ms())
        .bind(code.active as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_code(&self, code: &str) -> Result<Option<ReferralCode>, sqlx::Error> {
        sqlx::query("SELECT code, owner_id, created_at_ms, active FROM referral_codes WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(code_from_row)
            .transpose()
    }

    pub async fn get_code_by_owner(
        &self,
        owner_id: &UserId,
    ) -> Result<Option<ReferralCode>, sqlx::Error> {
        sqlx::query(
            "SELECT code, owner_id, created_at_ms, active FROM referral_codes WHERE owner_id = ?",
        )
        .bind(owner_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(code_from_row)
        .transpose()
    }

    /// Owner of a code, read on the caller's connection.
    pub async fn code_owner(
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<Option<UserId>, sqlx::Error> {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM referral_codes WHERE code = ?")
                .bind(code)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(owner.map(UserId::new))
    }

    pub async fn set_code_active(&self, code: &str, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE referral_codes SET active = ? WHERE code = ?")
            .bind(active as i64)
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Clicks
    // =========================================================================

    /// Record a click start; a repeated session id is ignored.
    pub async fn insert_click_if_absent(
        &self,
        code: &str,
        session_id: &str,
        started_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO referral_clicks (code, session_id, status, started_at_ms)
            VALUES (?, ?, 'STARTED', ?)
            ON CONFLICT(session_id) DO NOTHING
            "#,
        )
        .bind(code)
        .bind(session_id)
        .bind(started_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_click_by_session(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<Option<ReferralClick>, sqlx::Error> {
        sqlx::query(
            r#"
            SELECT id, code, session_id, status, started_at_ms, qualified_at_ms, period_id
            FROM referral_clicks
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(click_from_row)
        .transpose()
    }

    /// STARTED -> QUALIFIED if the click started at or before `dwell_cutoff`.
    ///
    /// Stamps the click with the OPEN period. Returns whether this call made the transition.
    pub async fn qualify_click(
        conn: &mut SqliteConnection,
        session_id: &str,
        now: TimeMs,
        dwell_cutoff: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE referral_clicks
            SET status = 'QUALIFIED', qualified_at_ms = ?, period_id = {OPEN_PERIOD_ID}
            WHERE session_id = ? AND status = 'STARTED' AND started_at_ms <= ?
            "#
        );
        let result = sqlx::query(&sql)
            .bind(now.as_ms())
            .bind(session_id)
            .bind(dwell_cutoff.as_ms())
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Expire clicks still STARTED before `cutoff`.
    pub async fn expire_clicks_started_before(&self, cutoff: TimeMs) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE referral_clicks SET status = 'EXPIRED' WHERE status = 'STARTED' AND started_at_ms < ?",
        )
        .bind(cutoff.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Qualified clicks per code owner for a period.
    pub async fn qualified_clicks_by_owner(
        conn: &mut SqliteConnection,
        period_id: i64,
    ) -> Result<Vec<(UserId, i64)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT rc.owner_id AS owner_id, COUNT(*) AS n
            FROM referral_clicks c
            JOIN referral_codes rc ON rc.code = c.code
            WHERE c.period_id = ? AND c.status = 'QUALIFIED'
            GROUP BY rc.owner_id
            "#,
        )
        .bind(period_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(owner_count_from_row).collect()
    }

    // =========================================================================
    // Signups
    // =========================================================================

    /// First-write-wins attribution of a vendor to a code, stamped with the OPEN period.
    pub async fn insert_signup_if_absent(
        &self,
        code: &str,
        vendor_id: &UserId,
        created_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO referral_signups
                (code, vendor_id, signup_status, listing_status, created_at_ms, period_id)
            VALUES (?, ?, 'PENDING', 'PENDING', ?, {OPEN_PERIOD_ID})
            ON CONFLICT(vendor_id) DO NOTHING
            "#
        );
        let result = sqlx::query(&sql)
            .bind(code)
            .bind(vendor_id.as_str())
            .bind(created_at.as_ms())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_signup_by_vendor(
        conn: &mut SqliteConnection,
        vendor_id: &UserId,
    ) -> Result<Option<ReferralSignup>, sqlx::Error> {
        let sql = format!("SELECT {SIGNUP_COLUMNS} FROM referral_signups WHERE vendor_id = ?");
        sqlx::query(&sql)
            .bind(vendor_id.as_str())
            .fetch_optional(&mut *conn)
            .await?
            .as_ref()
            .map(signup_from_row)
            .transpose()
    }

    /// signup_status PENDING -> QUALIFIED. Returns whether this call made the transition.
    pub async fn qualify_signup_account(
        conn: &mut SqliteConnection,
        vendor_id: &UserId,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE referral_signups
            SET signup_status = 'QUALIFIED', signup_qualified_at_ms = ?
            WHERE vendor_id = ? AND signup_status = 'PENDING'
            "#,
        )
        .bind(now.as_ms())
        .bind(vendor_id.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// listing_status PENDING -> QUALIFIED. Returns whether this call made the transition.
    pub async fn qualify_signup_listing(
        conn: &mut SqliteConnection,
        vendor_id: &UserId,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE referral_signups
            SET listing_status = 'QUALIFIED', listing_qualified_at_ms = ?
            WHERE vendor_id = ? AND listing_status = 'PENDING'
            "#,
        )
        .bind(now.as_ms())
        .bind(vendor_id.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Stamp the activation period once both qualifications have landed.
    pub async fn mark_signup_activated(
        conn: &mut SqliteConnection,
        signup_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE referral_signups
            SET activated_period_id = {OPEN_PERIOD_ID}
            WHERE id = ?
              AND signup_status = 'QUALIFIED'
              AND listing_status = 'QUALIFIED'
              AND activated_period_id IS NULL
            "#
        );
        let result = sqlx::query(&sql)
            .bind(signup_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Signups recorded in a period, per code owner.
    pub async fn referred_vendors_by_owner(
        conn: &mut SqliteConnection,
        period_id: i64,
    ) -> Result<Vec<(UserId, i64)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT rc.owner_id AS owner_id, COUNT(DISTINCT s.id) AS n
            FROM referral_signups s
            JOIN referral_codes rc ON rc.code = s.code
            WHERE s.period_id = ?
            GROUP BY rc.owner_id
            "#,
        )
        .bind(period_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(owner_count_from_row).collect()
    }

    /// Signups that became fully activated in a period, per code owner.
    pub async fn activated_vendors_by_owner(
        conn: &mut SqliteConnection,
        period_id: i64,
    ) -> Result<Vec<(UserId, i64)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT rc.owner_id AS owner_id, COUNT(DISTINCT s.id) AS n
            FROM referral_signups s
            JOIN referral_codes rc ON rc.code = s.code
            WHERE s.activated_period_id = ?
              AND s.signup_status = 'QUALIFIED'
              AND s.listing_status = 'QUALIFIED'
            GROUP BY rc.owner_id
            "#,
        )
        .bind(period_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(owner_count_from_row).collect()
    }

    /// Signups still in the OPEN period, i.e. not yet folded into any statement.
    pub async fn sweepable_signups(&self) -> Result<Vec<ReferralSignup>, sqlx::Error> {
        let sql = format!(
            "SELECT {SIGNUP_COLUMNS} FROM referral_signups WHERE period_id = {OPEN_PERIOD_ID} ORDER BY id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(signup_from_row).collect()
    }

    /// Delete a signup only if it still belongs to the OPEN period.
    pub async fn delete_sweepable_signup(&self, signup_id: i64) -> Result<bool, sqlx::Error> {
        let sql = format!(
            "DELETE FROM referral_signups WHERE id = ? AND period_id = {OPEN_PERIOD_ID}"
        );
        let result = sqlx::query(&sql)
            .bind(signup_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn owner_count_from_row(row: &SqliteRow) -> Result<(UserId, i64), sqlx::Error> {
    Ok((
        UserId::new(row.try_get::<String, _>("owner_id")?),
        row.try_get("n")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;
    use crate::domain::{ClickStatus, MonthKey, QualificationStatus};

    async fn open_period(repo: &Repository) {
        repo.insert_open_period_if_absent(MonthKey::new(2024, 3).unwrap())
            .await
            .unwrap();
    }

    fn code(owner: &str, code: &str) -> ReferralCode {
        ReferralCode {
            code: code.to_string(),
            owner_id: UserId::new(owner),
            created_at: TimeMs::new(0),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_one_code_per_owner() {
        let (repo, _temp) = setup_test_db().await;
        assert!(repo.insert_code_if_absent(&code("p1", "AAAA0001")).await.unwrap());
        assert!(!repo.insert_code_if_absent(&code("p1", "AAAA0002")).await.unwrap());
        assert!(!repo.insert_code_if_absent(&code("p2", "AAAA0001")).await.unwrap());

        let stored = repo.get_code_by_owner(&UserId::new("p1")).await.unwrap().unwrap();
        assert_eq!(stored.code, "AAAA0001");
    }

    #[tokio::test]
    async fn test_click_session_is_unique() {
        let (repo, _temp) = setup_test_db().await;
        assert!(repo.insert_click_if_absent("AAAA0001", "s1", TimeMs::new(0)).await.unwrap());
        assert!(!repo.insert_click_if_absent("AAAA0001", "s1", TimeMs::new(5)).await.unwrap());

        let mut conn = repo.pool().acquire().await.unwrap();
        let click = Repository::get_click_by_session(&mut conn, "s1").await.unwrap().unwrap();
        assert_eq!(click.started_at, TimeMs::new(0));
        assert_eq!(click.status, ClickStatus::Started);
    }

    #[tokio::test]
    async fn test_qualify_click_respects_dwell_and_runs_once() {
        let (repo, _temp) = setup_test_db().await;
        open_period(&repo).await;
        repo.insert_click_if_absent("AAAA0001", "s1", TimeMs::new(1_000)).await.unwrap();
        let mut conn = repo.pool().acquire().await.unwrap();

        let early = Repository::qualify_click(&mut conn, "s1", TimeMs::new(5_000), TimeMs::new(500))
            .await
            .unwrap();
        assert!(!early);

        let first = Repository::qualify_click(&mut conn, "s1", TimeMs::new(11_000), TimeMs::new(1_000))
            .await
            .unwrap();
        let second = Repository::qualify_click(&mut conn, "s1", TimeMs::new(12_000), TimeMs::new(2_000))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        let click = Repository::get_click_by_session(&mut conn, "s1").await.unwrap().unwrap();
        assert_eq!(click.qualified_at, Some(TimeMs::new(11_000)));
        assert!(click.period_id.is_some());
    }

    #[tokio::test]
    async fn test_expired_click_cannot_qualify() {
        let (repo, _temp) = setup_test_db().await;
        open_period(&repo).await;
        repo.insert_click_if_absent("AAAA0001", "s1", TimeMs::new(0)).await.unwrap();
        assert_eq!(repo.expire_clicks_started_before(TimeMs::new(10)).await.unwrap(), 1);

        let mut conn = repo.pool().acquire().await.unwrap();
        let qualified = Repository::qualify_click(&mut conn, "s1", TimeMs::new(60_000), TimeMs::new(50_000))
            .await
            .unwrap();
        assert!(!qualified);
    }

    #[tokio::test]
    async fn test_signup_first_write_wins() {
        let (repo, _temp) = setup_test_db().await;
        open_period(&repo).await;
        let vendor = UserId::new("v1");
        assert!(repo.insert_signup_if_absent("AAAA0001", &vendor, TimeMs::new(0)).await.unwrap());
        assert!(!repo.insert_signup_if_absent("BBBB0002", &vendor, TimeMs::new(1)).await.unwrap());

        let mut conn = repo.pool().acquire().await.unwrap();
        let signup = Repository::get_signup_by_vendor(&mut conn, &vendor).await.unwrap().unwrap();
        assert_eq!(signup.code, "AAAA0001");
        assert_eq!(signup.signup_status, QualificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_activation_requires_both_qualifications() {
        let (repo, _temp) = setup_test_db().await;
        open_period(&repo).await;
        let vendor = UserId::new("v1");
        repo.insert_signup_if_absent("AAAA0001", &vendor, TimeMs::new(0)).await.unwrap();
        let mut conn = repo.pool().acquire().await.unwrap();
        let signup = Repository::get_signup_by_vendor(&mut conn, &vendor).await.unwrap().unwrap();

        assert!(Repository::qualify_signup_account(&mut conn, &vendor, TimeMs::new(1)).await.unwrap());
        assert!(!Repository::mark_signup_activated(&mut conn, signup.id).await.unwrap());

        assert!(Repository::qualify_signup_listing(&mut conn, &vendor, TimeMs::new(2)).await.unwrap());
        assert!(Repository::mark_signup_activated(&mut conn, signup.id).await.unwrap());
        assert!(!Repository::mark_signup_activated(&mut conn, signup.id).await.unwrap());

        let signup = Repository::get_signup_by_vendor(&mut conn, &vendor).await.unwrap().unwrap();
        assert!(signup.is_activated());
        assert_eq!(signup.activated_period_id, Some(signup.period_id));
    }
}
