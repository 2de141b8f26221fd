//! In-memory [`KvStore`] for tests and ephemeral engines.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::KvStore;
use crate::Error;

type Namespace = BTreeMap<String, Vec<u8>>;

/// Uses a `BTreeMap` per namespace with a tokio RwLock for concurrent access.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<BTreeMap<String, Namespace>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.entry(namespace.to_string()).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn put_many(&self, namespace: &str, entries: Vec<(String, Vec<u8>)>) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.entry(namespace.to_string()).or_default().extend(entries);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        Ok(inner.get_mut(namespace).and_then(|ns| ns.remove(key)).is_some())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn count(&self, namespace: &str) -> Result<u64, Error> {
        let inner = self.inner.read().await;
        Ok(inner.get(namespace).map_or(0, |ns| ns.len() as u64))
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.entry(namespace.to_string()).or_default();
        Ok(())
    }

    async fn namespaces(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.keys().filter(|name| name.starts_with(prefix)).cloned().collect())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        Ok(inner.remove(namespace).is_some())
    }
}
