//! [`KvStore`] operations on the SQLite backend.

use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

use super::{KvStore, SqliteStore};
use crate::Error;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn ensure_namespace(conn: &rusqlite::Connection, namespace: &str) -> Result<(), Error> {
    conn.execute(
        "INSERT OR IGNORE INTO namespaces (name, created_at) VALUES (?1, ?2)",
        params![namespace, now()],
    )?;
    Ok(())
}

fn upsert(conn: &rusqlite::Connection, namespace: &str, key: &str, value: &[u8]) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO entries (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(namespace, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at",
        params![namespace, key, value, now()],
    )?;
    Ok(())
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let value = conn
                    .query_row(
                        "SELECT value FROM entries WHERE namespace = ?1 AND key = ?2",
                        params![namespace, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Error::from)
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                ensure_namespace(&tx, &namespace)?;
                upsert(&tx, &namespace, &key, &value)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn put_many(&self, namespace: &str, entries: Vec<(String, Vec<u8>)>) -> Result<(), Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                ensure_namespace(&tx, &namespace)?;
                for (key, value) in &entries {
                    upsert(&tx, &namespace, key, value)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<(String, Vec<u8>)>, Error> {
                let mut stmt = conn.prepare("SELECT key, value FROM entries WHERE namespace = ?1 ORDER BY key ASC")?;
                let rows = stmt.query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let mut entries = Vec::new();
                for row in rows {
                    entries.push(row?);
                }
                Ok(entries)
            })
            .await
            .map_err(Error::from)
    }

    async fn count(&self, namespace: &str) -> Result<u64, Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entries WHERE namespace = ?1",
                    params![namespace],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> { ensure_namespace(conn, &namespace) })
            .await
            .map_err(Error::from)
    }

    async fn namespaces(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let prefix = prefix.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT name FROM namespaces WHERE substr(name, 1, length(?1)) = ?1 ORDER BY name ASC",
                )?;
                let rows = stmt.query_map(params![prefix], |row| row.get(0))?;
                let mut names = Vec::new();
                for row in rows {
                    names.push(row?);
                }
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool, Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM namespaces WHERE name = ?1", params![namespace])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }
}
