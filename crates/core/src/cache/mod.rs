//! Cache partition store.
//!
//! This module provides named, versioned cache partitions on top of the
//! durable KV store. It supports:
//!
//! - Request identities normalized from method + URL, keyed by SHA-256
//! - One entry per identity per partition (upsert, no history)
//! - Per-partition max age for freshness checks and pruning
//! - Listing and deleting whole partitions for version cleanup

pub mod entry;
pub mod identity;
pub mod partition;

pub use entry::CacheEntry;
pub use identity::{RequestIdentity, UrlError, normalize_url};
pub use partition::{CACHE_NAMESPACE, Partition, PartitionSpec, PartitionStore};
