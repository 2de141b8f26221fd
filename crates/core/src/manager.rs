//! The explicit engine context shared by every component.

use std::sync::Arc;

use chrono::Duration;
use url::Url;

use crate::Error;
use crate::cache::{Partition, PartitionSpec, PartitionStore, RequestIdentity, UrlError};
use crate::config::AppConfig;
use crate::http::Fetcher;
use crate::route::{API, DYNAMIC, RouteClassifier, STATIC};
use crate::store::KvStore;

/// Injected dependencies plus derived settings, built once at startup.
///
/// Cheap to clone: everything inside is reference-counted.
#[derive(Clone)]
pub struct CacheManager {
    kv: Arc<dyn KvStore>,
    partitions: PartitionStore,
    fetcher: Arc<dyn Fetcher>,
    classifier: Arc<RouteClassifier>,
    config: Arc<AppConfig>,
    origin: Url,
    specs: Arc<Vec<PartitionSpec>>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("origin", &self.origin.as_str())
            .field("prefix", &self.config.cache_prefix)
            .field("version", &self.config.cache_version)
            .finish()
    }
}

impl CacheManager {
    pub fn new(kv: Arc<dyn KvStore>, fetcher: Arc<dyn Fetcher>, config: AppConfig) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("origin: {e}")))?;
        let classifier = RouteClassifier::from_config(&config)?;

        let version = config.cache_version.clone();
        let specs = vec![
            PartitionSpec::new(STATIC, version.clone(), None),
            PartitionSpec::new(DYNAMIC, version.clone(), Some(seconds(config.dynamic_max_age_secs))),
            PartitionSpec::new(API, version, Some(seconds(config.api_max_age_secs))),
        ];

        Ok(Self {
            partitions: PartitionStore::new(Arc::clone(&kv)),
            kv,
            fetcher,
            classifier: Arc::new(classifier),
            config: Arc::new(config),
            origin,
            specs: Arc::new(specs),
        })
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn partitions(&self) -> &PartitionStore {
        &self.partitions
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn classifier(&self) -> &RouteClassifier {
        &self.classifier
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn version(&self) -> &str {
        &self.config.cache_version
    }

    /// The live partitions of the current version.
    pub fn specs(&self) -> &[PartitionSpec] {
        &self.specs
    }

    /// Storage name of a live partition category.
    pub fn storage_name(&self, category: &str) -> String {
        format!("{}-{}-{}", self.config.cache_prefix, category, self.config.cache_version)
    }

    /// Storage names of every live partition.
    pub fn live_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.storage_name(&self.config.cache_prefix)).collect()
    }

    /// Whether a partition name is `<prefix>-<category>-<version>` for this
    /// engine's prefix and one of its categories, any version.
    pub fn owns(&self, name: &str) -> bool {
        let Some(rest) = name.strip_prefix(self.config.cache_prefix.as_str()).and_then(|r| r.strip_prefix('-'))
        else {
            return false;
        };
        match rest.split_once('-') {
            Some((category, version)) => !version.is_empty() && self.specs.iter().any(|s| s.name == category),
            None => false,
        }
    }

    /// Open the current-version partition of a category, with its max age attached.
    pub async fn partition(&self, category: &str) -> Result<Partition, Error> {
        let max_age = self.specs.iter().find(|s| s.name == category).and_then(|s| s.max_age);
        let partition = self.partitions.open(&self.storage_name(category)).await?;
        Ok(partition.with_max_age(max_age))
    }

    pub fn identity(&self, method: &str, url: &str) -> Result<RequestIdentity, UrlError> {
        RequestIdentity::resolve(method, url, &self.origin)
    }
}

fn seconds(secs: u64) -> Duration {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    Duration::seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::StubFetcher;

    #[tokio::test]
    async fn test_live_names_follow_version() {
        let config = AppConfig { cache_prefix: "app".into(), cache_version: "v3".into(), ..Default::default() };
        let manager =
            CacheManager::new(Arc::new(MemoryStore::new()), Arc::new(StubFetcher::offline()), config).unwrap();

        assert_eq!(manager.live_names(), vec!["app-static-v3", "app-dynamic-v3", "app-api-v3"]);
        assert!(manager.owns("app-static-v3"));
        assert!(manager.owns("app-api-v0"));
    }

    #[tokio::test]
    async fn test_owns_ignores_lookalike_prefixes() {
        let config = AppConfig { cache_prefix: "app".into(), ..Default::default() };
        let manager =
            CacheManager::new(Arc::new(MemoryStore::new()), Arc::new(StubFetcher::offline()), config).unwrap();

        assert!(!manager.owns("app-admin-static-v1"));
        assert!(!manager.owns("apple-static-v1"));
        assert!(!manager.owns("app-static-"));
        assert!(!manager.owns("app-static"));
    }

    #[tokio::test]
    async fn test_partition_carries_max_age() {
        let config = AppConfig { api_max_age_secs: 60, ..Default::default() };
        let manager =
            CacheManager::new(Arc::new(MemoryStore::new()), Arc::new(StubFetcher::offline()), config).unwrap();

        let api = manager.partition(API).await.unwrap();
        assert_eq!(api.max_age(), Some(Duration::seconds(60)));
        assert_eq!(api.name(), "waystation-api-v1");

        let static_partition = manager.partition(STATIC).await.unwrap();
        assert_eq!(static_partition.max_age(), None);
    }

    #[test]
    fn test_bad_origin_rejected() {
        let config = AppConfig { origin: "::nope".into(), ..Default::default() };
        let result = CacheManager::new(Arc::new(MemoryStore::new()), Arc::new(StubFetcher::offline()), config);
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
