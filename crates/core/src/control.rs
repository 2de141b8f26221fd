//! Trigger dispatch.
//!
//! The host feeds every event through [`ControlSurface::dispatch`]: lifecycle
//! transitions, fetches, sync triggers and control messages. Delivery
//! handlers are registered per sync tag at startup.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Error;
use crate::http::{Request, Response};
use crate::lifecycle::{CleanupReport, LifecycleManager, PruneReport};
use crate::manager::CacheManager;
use crate::queue::{DeliveryHandler, DrainReport, QueueStatus, TaskQueue};
use crate::strategy::StrategyExecutor;

/// Periodic tag that always runs an age-based prune.
pub const CLEANUP_TAG: &str = "cache-cleanup";

pub const META_NAMESPACE: &str = "meta/";
const ACTIVE_VERSION_KEY: &str = "active_version";

#[derive(Debug, Clone)]
pub enum Trigger {
    Install,
    Activate,
    Request(Request),
    Sync { tag: String },
    PeriodicSync { tag: String },
    Message(ControlMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    GetCacheStatus,
    ClearCache,
    GetQueueStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    NotInstalled,
    /// Precached, waiting for activation.
    Waiting,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub caches: Vec<PartitionCount>,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicReport {
    pub tag: String,
    pub drained: Option<DrainReport>,
    pub pruned: Option<PruneReport>,
    pub refreshed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Installed { precached: usize },
    Activated(CleanupReport),
    Response(Response),
    Drained(DrainReport),
    Periodic(PeriodicReport),
    CacheStatus(CacheStatus),
    QueueStatus(Vec<QueueStatus>),
    Ack,
}

pub struct ControlSurface {
    manager: CacheManager,
    executor: StrategyExecutor,
    lifecycle: LifecycleManager,
    queue: TaskQueue,
    handlers: HashMap<String, Arc<dyn DeliveryHandler>>,
    state: RwLock<LifecycleState>,
}

impl std::fmt::Debug for ControlSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.handlers.keys().collect();
        tags.sort();
        f.debug_struct("ControlSurface")
            .field("manager", &self.manager)
            .field("handlers", &tags)
            .finish()
    }
}

impl ControlSurface {
    pub fn new(manager: CacheManager) -> Self {
        let queue = TaskQueue::new(Arc::clone(manager.kv()), manager.config().max_attempts);
        Self {
            executor: StrategyExecutor::new(manager.clone()),
            lifecycle: LifecycleManager::new(manager.clone()),
            queue,
            manager,
            handlers: HashMap::new(),
            state: RwLock::new(LifecycleState::NotInstalled),
        }
    }

    /// Register the delivery function for a sync tag, replacing any previous one.
    pub fn register(&mut self, tag: impl Into<String>, handler: Arc<dyn DeliveryHandler>) {
        self.handlers.insert(tag.into(), handler);
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Pick up the state left by a previous run.
    ///
    /// Comes back `Active` when the version recorded by the last activation is
    /// the configured one, so cached content is served without a new install.
    pub async fn restore(&self) -> Result<LifecycleState, Error> {
        let stored = self.manager.kv().get(META_NAMESPACE, ACTIVE_VERSION_KEY).await?;
        let mut state = self.state.write().await;
        if *state == LifecycleState::NotInstalled && stored.as_deref() == Some(self.manager.version().as_bytes()) {
            *state = LifecycleState::Active;
            tracing::info!(version = self.manager.version(), "restored active state");
        }
        Ok(*state)
    }

    /// Wait for background revalidations to finish.
    pub async fn settle(&self) {
        self.executor.settle().await;
    }

    pub async fn dispatch(&self, trigger: Trigger) -> Result<Outcome, Error> {
        match trigger {
            Trigger::Install => self.install().await,
            Trigger::Activate => self.activate().await,
            Trigger::Request(request) => Ok(Outcome::Response(self.request(&request).await)),
            Trigger::Sync { tag } => self.sync(&tag).await,
            Trigger::PeriodicSync { tag } => self.periodic_sync(&tag).await,
            Trigger::Message(message) => self.message(message).await,
        }
    }

    async fn install(&self) -> Result<Outcome, Error> {
        let precached = self.lifecycle.precache(&self.manager.config().precache).await?;

        let mut state = self.state.write().await;
        if *state == LifecycleState::NotInstalled {
            *state = LifecycleState::Waiting;
        }
        tracing::info!(precached, state = ?*state, "installed");
        Ok(Outcome::Installed { precached })
    }

    async fn activate(&self) -> Result<Outcome, Error> {
        if self.state().await == LifecycleState::NotInstalled {
            return Err(Error::InvalidState("activate before a successful install".into()));
        }

        let report = self.lifecycle.cleanup().await?;
        self.manager
            .kv()
            .put(META_NAMESPACE, ACTIVE_VERSION_KEY, self.manager.version().as_bytes().to_vec())
            .await?;
        *self.state.write().await = LifecycleState::Active;
        tracing::info!(
            version = self.manager.version(),
            deleted = report.deleted.len(),
            "activated, ready to handle requests"
        );
        Ok(Outcome::Activated(report))
    }

    async fn request(&self, request: &Request) -> Response {
        if self.state().await == LifecycleState::Active {
            return self.executor.handle(request).await;
        }

        match self.manager.identity(&request.method, &request.url) {
            Ok(identity) => self.executor.passthrough(request, &identity).await,
            Err(e) => Response::bad_request(&format!("Bad Request: {e}")),
        }
    }

    async fn sync(&self, tag: &str) -> Result<Outcome, Error> {
        let handler = self.handlers.get(tag).ok_or_else(|| Error::UnknownTag(tag.to_string()))?;
        let report = self.queue.drain(tag, handler.as_ref()).await?;
        Ok(Outcome::Drained(report))
    }

    async fn periodic_sync(&self, tag: &str) -> Result<Outcome, Error> {
        let refresh = self.manager.config().periodic_refresh.get(tag);
        let handler = self.handlers.get(tag);

        if tag != CLEANUP_TAG && refresh.is_none() && handler.is_none() {
            return Err(Error::UnknownTag(tag.to_string()));
        }

        let mut report = PeriodicReport { tag: tag.to_string(), ..Default::default() };

        if tag == CLEANUP_TAG {
            report.pruned = Some(self.lifecycle.prune().await);
        }
        if let Some(urls) = refresh {
            report.refreshed = self.lifecycle.refresh(urls).await;
        }
        if let Some(handler) = handler {
            report.drained = Some(self.queue.drain(tag, handler.as_ref()).await?);
        }

        tracing::debug!(tag, refreshed = report.refreshed, "periodic sync finished");
        Ok(Outcome::Periodic(report))
    }

    async fn message(&self, message: ControlMessage) -> Result<Outcome, Error> {
        match message {
            ControlMessage::SkipWaiting => {
                if self.state().await == LifecycleState::Waiting {
                    return self.activate().await;
                }
                tracing::debug!("skip waiting ignored, nothing is waiting");
                Ok(Outcome::Ack)
            }
            ControlMessage::GetCacheStatus => Ok(Outcome::CacheStatus(self.cache_status().await?)),
            ControlMessage::ClearCache => {
                self.clear_cache().await?;
                Ok(Outcome::Ack)
            }
            ControlMessage::GetQueueStatus => Ok(Outcome::QueueStatus(self.queue.status().await?)),
        }
    }

    /// Entry counts of every live partition.
    pub async fn cache_status(&self) -> Result<CacheStatus, Error> {
        let mut caches = Vec::with_capacity(self.manager.specs().len());
        for spec in self.manager.specs() {
            let partition = self.manager.partition(&spec.name).await?;
            caches.push(PartitionCount { name: partition.name().to_string(), count: partition.count().await? });
        }
        Ok(CacheStatus { caches, version: self.manager.version().to_string() })
    }

    /// Delete every partition owned by this engine, any version. Queues are untouched.
    pub async fn clear_cache(&self) -> Result<usize, Error> {
        let mut cleared = 0;
        for name in self.manager.partitions().partition_names().await? {
            if self.manager.owns(&name) && self.manager.partitions().delete_partition(&name).await? {
                cleared += 1;
            }
        }
        tracing::info!(cleared, "cleared caches");
        Ok(cleared)
    }
}
