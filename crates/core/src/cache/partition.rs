//! Named cache partitions over the durable KV store.
//!
//! A partition lives in the KV namespace `cache/<storage name>`, where the
//! storage name is `<prefix>-<category>-<version>`. Entries are keyed by the
//! SHA-256 storage key of their request identity, so a new `put` for the same
//! identity overwrites the previous entry.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::entry::CacheEntry;
use super::identity::RequestIdentity;
use crate::Error;
use crate::http::Response;
use crate::store::KvStore;

/// KV namespace prefix shared by every cache partition.
pub const CACHE_NAMESPACE: &str = "cache/";

/// Static description of a partition the engine manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    /// Category, e.g. "static", "dynamic", "api".
    pub name: String,
    pub version: String,
    pub max_age: Option<Duration>,
}

impl PartitionSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>, max_age: Option<Duration>) -> Self {
        Self { name: name.into(), version: version.into(), max_age }
    }

    /// `<prefix>-<category>-<version>`.
    pub fn storage_name(&self, prefix: &str) -> String {
        format!("{}-{}-{}", prefix, self.name, self.version)
    }
}

/// Entry point to all partitions.
#[derive(Clone)]
pub struct PartitionStore {
    kv: Arc<dyn KvStore>,
}

impl fmt::Debug for PartitionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionStore").field("kv", &self.kv).finish()
    }
}

impl PartitionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Open a partition by storage name, creating it on first use.
    pub async fn open(&self, name: &str) -> Result<Partition, Error> {
        let namespace = format!("{CACHE_NAMESPACE}{name}");
        self.kv.create_namespace(&namespace).await?;
        Ok(Partition { kv: Arc::clone(&self.kv), name: name.to_string(), namespace, max_age: None })
    }

    /// Storage names of every existing partition, sorted.
    pub async fn partition_names(&self) -> Result<Vec<String>, Error> {
        let names = self.kv.namespaces(CACHE_NAMESPACE).await?;
        Ok(names
            .into_iter()
            .filter_map(|ns| ns.strip_prefix(CACHE_NAMESPACE).map(str::to_string))
            .collect())
    }

    /// Delete a partition and all its entries. Returns whether it existed.
    pub async fn delete_partition(&self, name: &str) -> Result<bool, Error> {
        self.kv.delete_namespace(&format!("{CACHE_NAMESPACE}{name}")).await
    }
}

/// Handle to one partition.
#[derive(Clone)]
pub struct Partition {
    kv: Arc<dyn KvStore>,
    name: String,
    namespace: String,
    max_age: Option<Duration>,
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("name", &self.name)
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl Partition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Attach the expiry used by freshness checks and pruning.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Exact-key lookup.
    pub async fn match_entry(&self, identity: &RequestIdentity) -> Result<Option<CacheEntry>, Error> {
        match self.kv.get(&self.namespace, &identity.storage_key()).await? {
            Some(bytes) => Ok(Some(CacheEntry::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a response, replacing any previous entry for the identity.
    ///
    /// `stored_at` never moves backwards for a key, even if the clock does.
    pub async fn put(&self, identity: &RequestIdentity, response: &Response) -> Result<CacheEntry, Error> {
        let stored_at = self.next_stored_at(identity, Utc::now()).await;
        let entry = CacheEntry::new(identity.clone(), response, stored_at);
        self.kv.put(&self.namespace, &identity.storage_key(), entry.encode()?).await?;
        tracing::debug!(partition = %self.name, key = %identity, status = entry.status, "cache put");
        Ok(entry)
    }

    /// Store several responses in one atomic write.
    pub async fn put_all(&self, responses: &[(RequestIdentity, Response)]) -> Result<(), Error> {
        let now = Utc::now();
        let mut encoded = Vec::with_capacity(responses.len());
        for (identity, response) in responses {
            let stored_at = self.next_stored_at(identity, now).await;
            let entry = CacheEntry::new(identity.clone(), response, stored_at);
            encoded.push((identity.storage_key(), entry.encode()?));
        }
        self.kv.put_many(&self.namespace, encoded).await
    }

    async fn next_stored_at(&self, identity: &RequestIdentity, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.match_entry(identity).await {
            Ok(Some(previous)) if previous.stored_at > now => previous.stored_at,
            _ => now,
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub async fn delete(&self, identity: &RequestIdentity) -> Result<bool, Error> {
        self.kv.delete(&self.namespace, &identity.storage_key()).await
    }

    /// Every entry, skipping records that fail to decode.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>, Error> {
        let raw = self.kv.list(&self.namespace).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (key, bytes) in raw {
            match CacheEntry::decode(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(partition = %self.name, key = %key, error = %e, "skipping corrupt cache entry"),
            }
        }
        Ok(entries)
    }

    /// Identities of every entry.
    pub async fn keys(&self) -> Result<Vec<RequestIdentity>, Error> {
        Ok(self.entries().await?.into_iter().map(|e| e.key).collect())
    }

    pub async fn count(&self) -> Result<u64, Error> {
        self.kv.count(&self.namespace).await
    }
}
