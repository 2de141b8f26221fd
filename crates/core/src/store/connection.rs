//! Opening the SQLite file behind [`SqliteStore`].
//!
//! WAL journaling with `synchronous=NORMAL` keeps each committed put durable
//! across process restarts while letting readers proceed during writes.

use std::path::Path;

use tokio_rusqlite::Connection;

use super::migrations;
use crate::Error;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA busy_timeout=5000;
     PRAGMA foreign_keys=ON;";

/// SQLite-backed [`KvStore`](super::KvStore).
///
/// Cloning shares the same background connection thread.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the store file and migrate it to the latest schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        let store = Self::prepare(conn).await?;
        tracing::info!(path = %path.display(), "opened sqlite store");
        Ok(store)
    }

    /// Private in-memory database, gone when the last clone drops.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| conn.execute_batch(PRAGMAS)).await.map_err(Error::Database)?;
        migrations::run(&conn).await?;
        Ok(Self { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvStore;

    #[tokio::test]
    async fn test_open_in_memory_enables_foreign_keys() {
        let db = SqliteStore::open_in_memory().await.unwrap();
        let enabled: i64 = db
            .conn
            .call(|conn| conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_reopen_file_keeps_data() {
        let path = std::env::temp_dir().join(format!("waystation-reopen-{}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let db = SqliteStore::open(&path).await.unwrap();
            db.put("queue/user-data", "00000000000000000001", b"payload".to_vec())
                .await
                .unwrap();
        }

        let db = SqliteStore::open(&path).await.unwrap();
        let value = db.get("queue/user-data", "00000000000000000001").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"payload"[..]));

        drop(db);
        let _ = std::fs::remove_file(&path);
    }
}
