//! Caching strategies.
//!
//! Every strategy resolves to a [`Response`]; network and storage failures
//! are turned into cached fallbacks or synthetic error statuses here and
//! never reach the caller. Only 2xx network responses are written to the
//! cache. Storage errors are logged and treated as a miss or a skipped write.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::cache::{CacheEntry, Partition, RequestIdentity};
use crate::http::{Request, Response};
use crate::manager::CacheManager;
use crate::route::{STATIC, Strategy};
use crate::Error;

/// Runs the four caching algorithms over the partition store and fetcher.
#[derive(Debug, Clone)]
pub struct StrategyExecutor {
    manager: CacheManager,
    revalidations: Arc<Mutex<JoinSet<()>>>,
}

impl StrategyExecutor {
    pub fn new(manager: CacheManager) -> Self {
        Self { manager, revalidations: Arc::new(Mutex::new(JoinSet::new())) }
    }

    /// Classify and answer a request.
    ///
    /// Invalid URLs get a 400. Non-GET requests skip the cache and go
    /// straight to the network.
    pub async fn handle(&self, request: &Request) -> Response {
        let identity = match self.manager.identity(&request.method, &request.url) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!(url = %request.url, error = %e, "rejecting request");
                return Response::bad_request(&format!("Bad Request: {e}"));
            }
        };

        if !request.is_get() {
            return self.passthrough(request, &identity).await;
        }

        let route = self.manager.classifier().classify_request(&identity.url, request.mode);
        let partition = match self.manager.partition(route.partition).await {
            Ok(partition) => partition,
            Err(e) => {
                tracing::warn!(partition = route.partition, error = %e, "partition unavailable, bypassing cache");
                return self.passthrough(request, &identity).await;
            }
        };

        tracing::debug!(key = %identity, strategy = ?route.strategy, partition = partition.name(), "routing request");
        self.execute(route.strategy, request, &identity, &partition).await
    }

    /// Run one strategy against an explicit partition.
    pub async fn execute(
        &self, strategy: Strategy, request: &Request, identity: &RequestIdentity, partition: &Partition,
    ) -> Response {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request, identity, partition).await,
            Strategy::NetworkFirst => self.network_first(request, identity, partition).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, identity, partition).await,
            Strategy::NavigationFallback => self.navigation_fallback(request, identity, partition).await,
        }
    }

    /// Network only, 503 when unreachable. Nothing is read from or written to the cache.
    pub async fn passthrough(&self, request: &Request, identity: &RequestIdentity) -> Response {
        match self.fetch(request, identity).await {
            Ok(response) => response,
            Err(_) => Response::service_unavailable(),
        }
    }

    async fn cache_first(&self, request: &Request, identity: &RequestIdentity, partition: &Partition) -> Response {
        let cached = lookup(partition, identity).await;

        if let Some(entry) = &cached
            && entry.is_fresh(partition.max_age(), Utc::now())
        {
            tracing::debug!("cache hit for {}", identity);
            return entry.to_response();
        }

        match self.fetch(request, identity).await {
            Ok(response) => {
                store(partition, identity, &response).await;
                response
            }
            Err(_) => match cached {
                Some(entry) => {
                    tracing::debug!("serving expired entry for {} while offline", identity);
                    entry.to_response()
                }
                None => Response::request_timeout(),
            },
        }
    }

    async fn network_first(&self, request: &Request, identity: &RequestIdentity, partition: &Partition) -> Response {
        match self.fetch(request, identity).await {
            Ok(response) => {
                store(partition, identity, &response).await;
                response
            }
            Err(_) => match lookup(partition, identity).await {
                Some(entry) => entry.to_response(),
                None => Response::service_unavailable(),
            },
        }
    }

    async fn stale_while_revalidate(
        &self, request: &Request, identity: &RequestIdentity, partition: &Partition,
    ) -> Response {
        let Some(entry) = lookup(partition, identity).await else {
            return match self.fetch(request, identity).await {
                Ok(response) => {
                    store(partition, identity, &response).await;
                    response
                }
                Err(_) => Response::request_timeout(),
            };
        };

        self.spawn_revalidation(request, identity, partition).await;
        entry.to_response()
    }

    async fn navigation_fallback(
        &self, request: &Request, identity: &RequestIdentity, partition: &Partition,
    ) -> Response {
        match self.fetch(request, identity).await {
            Ok(response) => {
                store(partition, identity, &response).await;
                return response;
            }
            Err(_) => tracing::debug!("navigation to {} failed, looking for a fallback", identity),
        }

        if let Some(entry) = lookup(partition, identity).await {
            return entry.to_response();
        }

        let Ok(static_partition) = self.manager.partition(STATIC).await else {
            return Response::service_unavailable();
        };

        if let Some(entry) = lookup(&static_partition, identity).await {
            return entry.to_response();
        }

        match self.manager.identity("GET", &self.manager.config().offline_page) {
            Ok(offline) => match lookup(&static_partition, &offline).await {
                Some(entry) => entry.to_response(),
                None => Response::service_unavailable(),
            },
            Err(_) => Response::service_unavailable(),
        }
    }

    async fn spawn_revalidation(&self, request: &Request, identity: &RequestIdentity, partition: &Partition) {
        let fetcher = Arc::clone(self.manager.fetcher());
        let outbound = outbound(request, identity);
        let identity = identity.clone();
        let partition = partition.clone();

        let mut tasks = self.revalidations.lock().await;
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            match fetcher.fetch(&outbound).await {
                Ok(response) => store(&partition, &identity, &response).await,
                Err(e) => tracing::warn!(key = %identity, error = %e, "background revalidation failed"),
            }
        });
    }

    /// Wait for every in-flight background revalidation to finish.
    ///
    /// Revalidations spawned while waiting are not included.
    pub async fn settle(&self) {
        let mut tasks = std::mem::take(&mut *self.revalidations.lock().await);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "revalidation task panicked");
            }
        }
    }

    async fn fetch(&self, request: &Request, identity: &RequestIdentity) -> Result<Response, Error> {
        let start = Instant::now();
        let result = self.manager.fetcher().fetch(&outbound(request, identity)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => tracing::debug!(key = %identity, status = response.status, elapsed_ms, "network response"),
            Err(e) => tracing::debug!(key = %identity, error = %e, elapsed_ms, "network failure"),
        }
        result
    }
}

/// The request as sent to the network: same method, headers and body, absolute URL.
fn outbound(request: &Request, identity: &RequestIdentity) -> Request {
    Request { url: identity.url.clone(), ..request.clone() }
}

async fn lookup(partition: &Partition, identity: &RequestIdentity) -> Option<CacheEntry> {
    match partition.match_entry(identity).await {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(partition = partition.name(), key = %identity, error = %e, "cache read failed");
            None
        }
    }
}

async fn store(partition: &Partition, identity: &RequestIdentity, response: &Response) {
    if !response.is_success() {
        tracing::debug!(key = %identity, status = response.status, "not caching non-success response");
        return;
    }
    if let Err(e) = partition.put(identity, response).await {
        tracing::warn!(partition = partition.name(), key = %identity, error = %e, "cache write failed");
    }
}
