//! Database initialization and schema migration.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Open (creating if needed) the SQLite database, configure pragmas and apply the schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!(path = %db_path, "Payout database ready");
    Ok(pool)
}

/// Apply every statement of the schema. All statements are `IF NOT EXISTS`.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut applied = 0usize;
    for statement in SCHEMA_SQL.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
            applied += 1;
        }
    }

    debug!(statements = applied, "Schema applied");
    Ok(())
}

async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    use sqlx::Row;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode returns the mode actually in effect
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.try_get(0)?;
    debug!(journal_mode = %journal_mode, "SQLite connection configured");

    // Concurrent writers queue on the write lock instead of failing fast.
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (pool, temp_dir)
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let (pool, _temp) = setup().await;

        for table in [
            "referral_codes",
            "referral_clicks",
            "referral_signups",
            "commissions",
            "payout_periods",
            "partner_statements",
        ] {
            let result: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .expect("query failed");
            assert_eq!(result.0, 1, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let (pool, _temp) = setup().await;
        run_migrations(&pool)
            .await
            .expect("second migration run failed");
    }

    #[tokio::test]
    async fn test_only_one_open_period_allowed() {
        let (pool, _temp) = setup().await;

        sqlx::query(
            "INSERT INTO payout_periods (year, month, status, start_ms, end_ms) VALUES (2024, 1, 'OPEN', 0, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let second = sqlx::query(
            "INSERT INTO payout_periods (year, month, status, start_ms, end_ms) VALUES (2024, 2, 'OPEN', 1, 2)",
        )
        .execute(&pool)
        .await;
        assert!(second.is_err(), "second OPEN period must violate the partial index");

        sqlx::query(
            "INSERT INTO payout_periods (year, month, status, start_ms, end_ms) VALUES (2023, 12, 'LOCKED', -1, 0)",
        )
        .execute(&pool)
        .await
        .expect("LOCKED periods are unrestricted");
    }

    #[tokio::test]
    async fn test_commission_source_is_unique() {
        let (pool, _temp) = setup().await;
        sqlx::query(
            "INSERT INTO payout_periods (year, month, status, start_ms, end_ms) VALUES (2024, 1, 'OPEN', 0, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let insert = "INSERT INTO commissions (partner_id, source_type, source_id, amount, status, created_at_ms, period_id) \
                      VALUES ('p1', 'CLICK', 7, '15', 'PENDING', 0, 1)";
        sqlx::query(insert).execute(&pool).await.unwrap();
        assert!(sqlx::query(insert).execute(&pool).await.is_err());
    }
}
