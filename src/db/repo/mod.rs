//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by table:
//! - `referrals.rs` - referral codes, clicks and signups
//! - `commissions.rs` - commission rows
//! - `periods.rs` - payout periods
//! - `statements.rs` - partner statements
//!
//! Operations that must compose inside one transaction take a
//! `&mut SqliteConnection` instead of `&self`; callers pass `&mut *tx`.

mod commissions;
mod periods;
mod referrals;
mod statements;

pub use commissions::{CommissionFilter, SweepCandidate};
pub use statements::StatementFilter;

use crate::domain::{Money, TimeMs, UnknownStatus};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;

/// Selects the id of the single OPEN period; NULL when none exists.
pub(crate) const OPEN_PERIOD_ID: &str =
    "(SELECT id FROM payout_periods WHERE status = 'OPEN' LIMIT 1)";

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction.
    ///
    /// SQLite transactions begin deferred; callers issue a write first so the
    /// writer lock is taken before any read they depend on.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }
}

pub(crate) fn decode_error<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

pub(crate) fn get_money(row: &SqliteRow, column: &str) -> Result<Money, sqlx::Error> {
    let text: String = row.try_get(column)?;
    Money::parse(&text).map_err(decode_error)
}

pub(crate) fn get_status<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownStatus>,
{
    let text: String = row.try_get(column)?;
    T::from_str(&text).map_err(decode_error)
}

pub(crate) fn get_time(row: &SqliteRow, column: &str) -> Result<TimeMs, sqlx::Error> {
    Ok(TimeMs::new(row.try_get::<i64, _>(column)?))
}

pub(crate) fn get_opt_time(row: &SqliteRow, column: &str) -> Result<Option<TimeMs>, sqlx::Error> {
    Ok(row.try_get::<Option<i64>, _>(column)?.map(TimeMs::new))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Repository;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    pub async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }
}
