//! Cache lifecycle: versioned precache, activation cleanup, age pruning.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::RequestIdentity;
use crate::http::{Request, Response};
use crate::manager::CacheManager;
use crate::route::{API, DYNAMIC, STATIC};

/// Entries removed by one pruning pass, per partition category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub api: u64,
    pub dynamic: u64,
}

/// Result of activation cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Storage names of the stale partitions that were deleted.
    pub deleted: Vec<String>,
    pub pruned: PruneReport,
}

#[derive(Debug, Clone)]
pub struct LifecycleManager {
    manager: CacheManager,
}

impl LifecycleManager {
    pub fn new(manager: CacheManager) -> Self {
        Self { manager }
    }

    /// Fetch every manifest resource and store them into the static partition.
    ///
    /// All or nothing: the first failed or non-2xx fetch aborts with
    /// `PrecacheFailed` before anything is written.
    pub async fn precache(&self, manifest: &[String]) -> Result<usize, Error> {
        let mut fetched: Vec<(RequestIdentity, Response)> = Vec::with_capacity(manifest.len());

        for resource in manifest {
            let identity = self
                .manager
                .identity("GET", resource)
                .map_err(|e| Error::PrecacheFailed { url: resource.clone(), reason: e.to_string() })?;

            let request = Request::get(identity.url.clone()).with_header("cache-control", "no-cache");
            let response = self
                .manager
                .fetcher()
                .fetch(&request)
                .await
                .map_err(|e| Error::PrecacheFailed { url: identity.url.clone(), reason: e.to_string() })?;

            if !response.is_success() {
                return Err(Error::PrecacheFailed {
                    url: identity.url.clone(),
                    reason: format!("status {}", response.status),
                });
            }

            fetched.push((identity, response));
        }

        let partition = self.manager.partition(STATIC).await?;
        partition.put_all(&fetched).await?;

        tracing::info!(
            partition = partition.name(),
            count = fetched.len(),
            version = self.manager.version(),
            "precache complete"
        );
        Ok(fetched.len())
    }

    /// Activation cleanup.
    ///
    /// Deletes every partition that is not a live current-version partition,
    /// makes sure the live ones exist, then prunes "api" and "dynamic" by age.
    pub async fn cleanup(&self) -> Result<CleanupReport, Error> {
        let live = self.manager.live_names();
        let mut deleted = Vec::new();

        for name in self.manager.partitions().partition_names().await? {
            if !live.contains(&name) {
                self.manager.partitions().delete_partition(&name).await?;
                tracing::info!(partition = %name, "deleted stale partition");
                deleted.push(name);
            }
        }

        for spec in self.manager.specs() {
            self.manager.partition(&spec.name).await?;
        }

        let pruned = self.prune().await;
        Ok(CleanupReport { deleted, pruned })
    }

    /// Remove expired entries from "api" and "dynamic".
    ///
    /// Static entries are never pruned by age. Failures are logged and the
    /// affected category reports 0.
    pub async fn prune(&self) -> PruneReport {
        let mut report = PruneReport::default();
        for category in [API, DYNAMIC] {
            let removed = match self.prune_category(category).await {
                Ok(removed) => removed,
                Err(e) => {
                    tracing::warn!(partition = category, error = %e, "pruning failed");
                    0
                }
            };
            match category {
                API => report.api = removed,
                _ => report.dynamic = removed,
            }
        }
        tracing::debug!(api = report.api, dynamic = report.dynamic, "prune pass finished");
        report
    }

    async fn prune_category(&self, category: &str) -> Result<u64, Error> {
        let partition = self.manager.partition(category).await?;
        let Some(max_age) = partition.max_age() else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut removed = 0;
        for entry in partition.entries().await? {
            if !entry.is_fresh(Some(max_age), now) && partition.delete(&entry.key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Re-fetch URLs into the partition their route selects. Returns how many were stored.
    ///
    /// Failures are logged per URL.
    pub async fn refresh(&self, urls: &[String]) -> usize {
        let mut refreshed = 0;
        for url in urls {
            let identity = match self.manager.identity("GET", url) {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "skipping refresh of invalid URL");
                    continue;
                }
            };
            let route = self.manager.classifier().classify(&identity.url);

            let response = match self.manager.fetcher().fetch(&Request::get(identity.url.clone())).await {
                Ok(response) if response.is_success() => response,
                Ok(response) => {
                    tracing::warn!(key = %identity, status = response.status, "refresh got non-success status");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(key = %identity, error = %e, "refresh fetch failed");
                    continue;
                }
            };

            let stored = match self.manager.partition(route.partition).await {
                Ok(partition) => partition.put(&identity, &response).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => refreshed += 1,
                Err(e) => tracing::warn!(key = %identity, error = %e, "refresh write failed"),
            }
        }
        refreshed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::{KvStore, SqliteStore};
    use crate::testing::StubFetcher;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const ORIGIN: &str = "https://app.example.com";

    async fn setup(config: AppConfig) -> (LifecycleManager, Arc<StubFetcher>, CacheManager) {
        let fetcher = Arc::new(StubFetcher::online());
        let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let config = AppConfig { origin: ORIGIN.into(), cache_prefix: "app".into(), ..config };
        let manager = CacheManager::new(store, fetcher.clone(), config).unwrap();
        (LifecycleManager::new(manager.clone()), fetcher, manager)
    }

    fn ok(body: &str) -> Response {
        Response::network(200, BTreeMap::new(), body.to_string())
    }

    fn manifest() -> Vec<String> {
        vec!["/".into(), "/offline.html".into(), "/app.js".into()]
    }

    #[tokio::test]
    async fn test_precache_stores_all() {
        let (lifecycle, fetcher, manager) = setup(AppConfig::default()).await;
        for path in manifest() {
            fetcher.respond(&format!("{ORIGIN}{path}"), 200, &path);
        }

        assert_eq!(lifecycle.precache(&manifest()).await.unwrap(), 3);

        let static_partition = manager.partition(STATIC).await.unwrap();
        assert_eq!(static_partition.count().await.unwrap(), 3);
        assert_eq!(static_partition.name(), "app-static-v1");
    }

    #[tokio::test]
    async fn test_precache_is_all_or_nothing() {
        let (lifecycle, fetcher, manager) = setup(AppConfig::default()).await;
        fetcher.respond(&format!("{ORIGIN}/"), 200, "home");
        fetcher.respond(&format!("{ORIGIN}/offline.html"), 200, "offline");
        fetcher.fail(&format!("{ORIGIN}/app.js"));

        let result = lifecycle.precache(&manifest()).await;
        assert!(matches!(result, Err(Error::PrecacheFailed { ref url, .. }) if url.ends_with("/app.js")));
        assert_eq!(manager.partition(STATIC).await.unwrap().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_precache_rejects_non_success() {
        let (lifecycle, fetcher, _) = setup(AppConfig::default()).await;
        fetcher.respond(&format!("{ORIGIN}/"), 200, "home");

        let result = lifecycle.precache(&["/".into(), "/missing.css".into()]).await;
        assert!(matches!(result, Err(Error::PrecacheFailed { reason, .. }) if reason == "status 404"));
    }

    #[tokio::test]
    async fn test_cleanup_leaves_exactly_live_partitions() {
        let (lifecycle, _, manager) = setup(AppConfig::default()).await;
        let partitions = manager.partitions();
        partitions.open("app-static-v0").await.unwrap();
        partitions.open("app-api-v0").await.unwrap();
        partitions.open("other-static-v1").await.unwrap();
        manager.partition(STATIC).await.unwrap();

        let report = lifecycle.cleanup().await.unwrap();

        assert_eq!(report.deleted, vec!["app-api-v0", "app-static-v0", "other-static-v1"]);
        let mut names = partitions.partition_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["app-api-v1", "app-dynamic-v1", "app-static-v1"]);
    }

    #[tokio::test]
    async fn test_prune_removes_expired_but_never_static() {
        let (lifecycle, _, manager) =
            setup(AppConfig { api_max_age_secs: 0, dynamic_max_age_secs: 3_600, ..Default::default() }).await;

        let news = manager.identity("GET", "/api/news").unwrap();
        let page = manager.identity("GET", "/about").unwrap();
        let asset = manager.identity("GET", "/app.js").unwrap();
        manager.partition(API).await.unwrap().put(&news, &ok("n")).await.unwrap();
        manager.partition(DYNAMIC).await.unwrap().put(&page, &ok("p")).await.unwrap();
        manager.partition(STATIC).await.unwrap().put(&asset, &ok("a")).await.unwrap();

        let report = lifecycle.prune().await;

        assert_eq!(report, PruneReport { api: 1, dynamic: 0 });
        assert_eq!(manager.partition(API).await.unwrap().count().await.unwrap(), 0);
        assert_eq!(manager.partition(DYNAMIC).await.unwrap().count().await.unwrap(), 1);
        assert_eq!(manager.partition(STATIC).await.unwrap().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_prunes_after_deleting() {
        let (lifecycle, _, manager) = setup(AppConfig { dynamic_max_age_secs: 0, ..Default::default() }).await;
        let page = manager.identity("GET", "/about").unwrap();
        manager.partition(DYNAMIC).await.unwrap().put(&page, &ok("p")).await.unwrap();

        let report = lifecycle.cleanup().await.unwrap();
        assert_eq!(report.pruned.dynamic, 1);
        assert!(report.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_writes_to_classified_partition() {
        let (lifecycle, fetcher, manager) = setup(AppConfig::default()).await;
        fetcher.respond(&format!("{ORIGIN}/api/news"), 200, "headlines");
        fetcher.respond(&format!("{ORIGIN}/api/weather"), 500, "down");

        let refreshed = lifecycle.refresh(&["/api/news".into(), "/api/weather".into()]).await;

        assert_eq!(refreshed, 1);
        let news = manager.identity("GET", "/api/news").unwrap();
        let entry = manager.partition(API).await.unwrap().match_entry(&news).await.unwrap().unwrap();
        assert_eq!(entry.body, "headlines");
    }
}
