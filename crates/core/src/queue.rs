//! Durable task queue for background synchronization.
//!
//! Items are stored per tag in the KV namespace `queue/<tag>` under a
//! zero-padded sequence key, so listing a namespace yields enqueue order.
//! The sequence counter lives in `queue-seq/` and is never reset, which keeps
//! ids unique across drains and restarts.
//!
//! ### Drain policy
//! - Items are delivered strictly in FIFO order, one at a time.
//! - A delivered item is deleted before the next one is attempted.
//! - The first failure stops the drain: the failed item gets its `attempts`
//!   bumped and stays at the head, everything behind it is untouched, and the
//!   caller receives `Error::DeliveryFailed` so it can schedule a retry.
//! - With `max_attempts` set, an item that reaches the cap is moved to
//!   `dead/<tag>` instead and the drain carries on.
//! - Records that no longer decode are moved to `dead/<tag>` untouched.
//! - Drains of the same tag never overlap.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::Error;
use crate::cache::entry::bytes_base64;
use crate::store::KvStore;

pub const QUEUE_NAMESPACE: &str = "queue/";
pub const DEAD_LETTER_NAMESPACE: &str = "dead/";
const SEQUENCE_NAMESPACE: &str = "queue-seq/";

/// A deferred write waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: u64,
    pub tag: String,
    #[serde(with = "bytes_base64")]
    pub payload: Bytes,
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl QueueItem {
    fn storage_key(&self) -> String {
        format!("{:020}", self.id)
    }
}

/// Delivery failed; the item should be retried later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RetryableError(pub String);

impl RetryableError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Sends one queued payload to wherever it belongs.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, item: &QueueItem) -> Result<(), RetryableError>;
}

/// Outcome of a drain that did not abort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub tag: String,
    pub delivered: usize,
    pub dead_lettered: usize,
}

/// Per-tag pending count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub tag: String,
    pub pending: u64,
}

#[derive(Clone)]
pub struct TaskQueue {
    kv: Arc<dyn KvStore>,
    max_attempts: Option<u32>,
    sequence: Arc<Mutex<()>>,
    drains: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("max_attempts", &self.max_attempts).finish()
    }
}

impl TaskQueue {
    pub fn new(kv: Arc<dyn KvStore>, max_attempts: Option<u32>) -> Self {
        Self {
            kv,
            max_attempts,
            sequence: Arc::new(Mutex::new(())),
            drains: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Append a payload under `tag`. Durable once this returns.
    pub async fn enqueue(&self, tag: &str, payload: impl Into<Bytes>) -> Result<QueueItem, Error> {
        validate_tag(tag)?;

        let _guard = self.sequence.lock().await;
        let id = match self.kv.get(SEQUENCE_NAMESPACE, tag).await? {
            Some(raw) => parse_sequence(&raw)? + 1,
            None => 1,
        };
        self.kv.put(SEQUENCE_NAMESPACE, tag, id.to_string().into_bytes()).await?;

        let item = QueueItem { id, tag: tag.to_string(), payload: payload.into(), enqueued_at: Utc::now(), attempts: 0 };
        self.kv
            .put(&queue_namespace(tag), &item.storage_key(), serde_json::to_vec(&item)?)
            .await?;

        tracing::debug!(tag, id, bytes = item.payload.len(), "enqueued sync item");
        Ok(item)
    }

    /// Pending items of a tag, oldest first.
    pub async fn pending(&self, tag: &str) -> Result<Vec<QueueItem>, Error> {
        Ok(decode_all(self.kv.list(&queue_namespace(tag)).await?))
    }

    pub async fn len(&self, tag: &str) -> Result<u64, Error> {
        self.kv.count(&queue_namespace(tag)).await
    }

    /// Every tag that has ever been enqueued to.
    pub async fn tags(&self) -> Result<Vec<String>, Error> {
        let namespaces = self.kv.namespaces(QUEUE_NAMESPACE).await?;
        Ok(namespaces
            .into_iter()
            .filter_map(|ns| ns.strip_prefix(QUEUE_NAMESPACE).map(str::to_string))
            .collect())
    }

    pub async fn status(&self) -> Result<Vec<QueueStatus>, Error> {
        let mut status = Vec::new();
        for tag in self.tags().await? {
            let pending = self.len(&tag).await?;
            status.push(QueueStatus { tag, pending });
        }
        Ok(status)
    }

    /// Items moved aside after exhausting `max_attempts`.
    pub async fn dead_letters(&self, tag: &str) -> Result<Vec<QueueItem>, Error> {
        Ok(decode_all(self.kv.list(&format!("{DEAD_LETTER_NAMESPACE}{tag}")).await?))
    }

    /// Deliver pending items of `tag` in order until the queue is empty or a delivery fails.
    pub async fn drain(&self, tag: &str, handler: &dyn DeliveryHandler) -> Result<DrainReport, Error> {
        let lock = self.drain_lock(tag);
        let _guard = lock.lock().await;

        let namespace = queue_namespace(tag);
        let mut report = DrainReport { tag: tag.to_string(), ..Default::default() };

        let dead = format!("{DEAD_LETTER_NAMESPACE}{tag}");

        for (key, raw) in self.kv.list(&namespace).await? {
            let item: QueueItem = match serde_json::from_slice(&raw) {
                Ok(item) => item,
                Err(e) => {
                    self.kv.put(&dead, &key, raw).await?;
                    self.kv.delete(&namespace, &key).await?;
                    report.dead_lettered += 1;
                    tracing::warn!(tag, key = %key, error = %e, "moved corrupt queue record to dead letters");
                    continue;
                }
            };
            let reason = match handler.deliver(&item).await {
                Ok(()) => {
                    self.kv.delete(&namespace, &key).await?;
                    report.delivered += 1;
                    tracing::debug!(tag, id = item.id, "delivered sync item");
                    continue;
                }
                Err(e) => e.to_string(),
            };

            let failed = QueueItem { attempts: item.attempts.saturating_add(1), ..item };

            if let Some(max) = self.max_attempts
                && failed.attempts >= max
            {
                self.kv.put(&dead, &key, serde_json::to_vec(&failed)?).await?;
                self.kv.delete(&namespace, &key).await?;
                report.dead_lettered += 1;
                tracing::warn!(tag, id = failed.id, attempts = failed.attempts, reason = %reason, "dead-lettered sync item");
                continue;
            }

            self.kv.put(&namespace, &key, serde_json::to_vec(&failed)?).await?;
            tracing::warn!(
                tag,
                id = failed.id,
                attempts = failed.attempts,
                delivered = report.delivered,
                reason = %reason,
                "sync delivery failed, aborting drain"
            );
            return Err(Error::DeliveryFailed { tag: tag.to_string(), item_id: failed.id, reason });
        }

        tracing::info!(tag, delivered = report.delivered, dead_lettered = report.dead_lettered, "drain complete");
        Ok(report)
    }

    fn drain_lock(&self, tag: &str) -> Arc<Mutex<()>> {
        let mut drains = self.drains.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(drains.entry(tag.to_string()).or_default())
    }
}

fn queue_namespace(tag: &str) -> String {
    format!("{QUEUE_NAMESPACE}{tag}")
}

fn validate_tag(tag: &str) -> Result<(), Error> {
    if tag.is_empty() || tag.contains('/') || tag.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput(format!("invalid sync tag: {tag:?}")));
    }
    Ok(())
}

fn parse_sequence(raw: &[u8]) -> Result<u64, Error> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Corrupt("queue sequence counter".into()))
}

/// Decodable items in key order; corrupt records are logged and skipped.
fn decode_all(raw: Vec<(String, Vec<u8>)>) -> Vec<QueueItem> {
    raw.into_iter()
        .filter_map(|(key, bytes)| match serde_json::from_slice(&bytes) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping corrupt queue record");
                None
            }
        })
        .collect()
}
