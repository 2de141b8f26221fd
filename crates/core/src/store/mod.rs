//! Durable namespaced key-value storage.
//!
//! Both the cache partitions and the sync queues sit on top of the
//! [`KvStore`] trait. Two implementations are provided:
//!
//! - [`SqliteStore`]: SQLite with async access via tokio-rusqlite, WAL mode,
//!   versioned migrations. Used in production, and in tests via
//!   [`SqliteStore::open_in_memory`].
//! - [`MemoryStore`]: a `BTreeMap` behind a tokio `RwLock`, for tests.
//!
//! Every mutation is applied before the call returns; there is no write
//! buffering. Listing always yields keys in ascending byte order, which the
//! queue relies on for FIFO delivery.

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;

use crate::Error;

pub use connection::SqliteStore;
pub use memory::MemoryStore;

/// Async namespaced key-value storage.
///
/// A namespace exists once it has been created explicitly or received its
/// first `put`, and stays listed (possibly empty) until deleted.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Read one value.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Insert or overwrite one value, creating the namespace if needed.
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), Error>;

    /// Insert or overwrite several values atomically: either all are written or none.
    async fn put_many(&self, namespace: &str, entries: Vec<(String, Vec<u8>)>) -> Result<(), Error>;

    /// Remove one value. Returns whether it existed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error>;

    /// All entries of a namespace in ascending key order.
    async fn list(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, Error>;

    /// Number of entries in a namespace.
    async fn count(&self, namespace: &str) -> Result<u64, Error>;

    /// Create an empty namespace. Idempotent.
    async fn create_namespace(&self, namespace: &str) -> Result<(), Error>;

    /// Names of existing namespaces starting with `prefix`, sorted.
    async fn namespaces(&self, prefix: &str) -> Result<Vec<String>, Error>;

    /// Drop a namespace and everything in it. Returns whether it existed.
    async fn delete_namespace(&self, namespace: &str) -> Result<bool, Error>;
}
