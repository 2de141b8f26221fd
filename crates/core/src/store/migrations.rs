//! Schema migrations for the KV store.
//!
//! Applied versions are recorded in `_migrations`. Each pending migration runs
//! inside its own transaction together with its bookkeeping row, so a failed
//! batch leaves the schema at the previous version.

use tokio_rusqlite::{Connection, params, rusqlite};

use crate::Error;

/// `(version, name, sql)`, strictly increasing versions.
const MIGRATIONS: &[(i64, &str, &str)] = &[(1, "kv", include_str!("../../migrations/001_kv.sql"))];

/// Highest version this build knows about.
pub const LATEST: i64 = MIGRATIONS[MIGRATIONS.len() - 1].0;

/// Bring the schema up to [`LATEST`].
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current = current_version(conn)?;
        if current > LATEST {
            return Err(Error::MigrationFailed(format!(
                "database schema v{current} is newer than this build (v{LATEST})"
            )));
        }

        for &(version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("v{version} {name}: {e}")))?;
            tx.execute(
                "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![version, name, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::debug!(version, name, "applied migration");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}

fn current_version(conn: &rusqlite::Connection) -> Result<i64, Error> {
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn version(conn: &Connection) -> i64 {
        conn.call(|conn| current_version(conn)).await.unwrap()
    }

    #[tokio::test]
    async fn test_run_twice_is_noop() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        let tables: i64 = conn
            .call(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('namespaces', 'entries')",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();

        assert_eq!(tables, 2);
        assert_eq!(version(&conn).await, LATEST);
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();
        conn.call(|conn| {
            conn.execute("INSERT INTO _migrations (version, name, applied_at) VALUES (999, 'future', 'now')", [])
        })
        .await
        .unwrap();

        assert!(matches!(run(&conn).await, Err(Error::MigrationFailed(_))));
    }
}
