//! HTTP delivery of queued sync items.
//!
//! Each configured sync tag posts its payloads to one endpoint. Anything
//! other than a 2xx answer leaves the item queued for the next drain.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use waystation_core::queue::{DeliveryHandler, QueueItem, RetryableError};
use waystation_core::{AppConfig, Error, Fetcher, Request};

/// POSTs queued payloads to a fixed endpoint.
pub struct HttpDelivery {
    fetcher: Arc<dyn Fetcher>,
    endpoint: Url,
}

impl std::fmt::Debug for HttpDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDelivery").field("endpoint", &self.endpoint.as_str()).finish()
    }
}

impl HttpDelivery {
    pub fn new(fetcher: Arc<dyn Fetcher>, endpoint: Url) -> Self {
        Self { fetcher, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl DeliveryHandler for HttpDelivery {
    async fn deliver(&self, item: &QueueItem) -> Result<(), RetryableError> {
        let request = Request::post(self.endpoint.as_str(), item.payload.clone())
            .with_header("content-type", "application/json")
            .with_header("x-sync-tag", item.tag.as_str())
            .with_header("x-sync-item", item.id.to_string())
            .with_header("x-sync-enqueued-at", item.enqueued_at.to_rfc3339());

        match self.fetcher.fetch(&request).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(RetryableError::new(format!("{} answered {}", self.endpoint, response.status))),
            Err(e) => Err(RetryableError::new(e.to_string())),
        }
    }
}

/// One delivery handler per entry of `sync_endpoints`, endpoints resolved against the origin.
pub fn delivery_handlers(
    config: &AppConfig, fetcher: Arc<dyn Fetcher>,
) -> Result<Vec<(String, Arc<dyn DeliveryHandler>)>, Error> {
    let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("origin: {}", e)))?;

    config
        .sync_endpoints
        .iter()
        .map(|(tag, endpoint)| {
            let url = origin
                .join(endpoint)
                .map_err(|e| Error::InvalidUrl(format!("sync endpoint for {}: {}", tag, e)))?;
            let handler: Arc<dyn DeliveryHandler> = Arc::new(HttpDelivery::new(Arc::clone(&fetcher), url));
            Ok((tag.clone(), handler))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use waystation_core::Response;

    /// Records outbound requests and answers with a fixed status, or fails when `status` is None.
    struct Scripted {
        status: Option<u16>,
        seen: Mutex<Vec<Request>>,
    }

    impl Scripted {
        fn new(status: Option<u16>) -> Arc<Self> {
            Arc::new(Self { status, seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl Fetcher for Scripted {
        async fn fetch(&self, request: &Request) -> Result<Response, Error> {
            self.seen.lock().unwrap().push(request.clone());
            match self.status {
                Some(status) => Ok(Response::network(status, BTreeMap::new(), "")),
                None => Err(Error::HttpError("network error: offline".into())),
            }
        }
    }

    fn item() -> QueueItem {
        QueueItem {
            id: 7,
            tag: "form-submission".into(),
            payload: Bytes::from_static(b"{\"name\":\"ada\"}"),
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    fn endpoint() -> Url {
        Url::parse("https://app.example.com/api/forms").unwrap()
    }

    #[tokio::test]
    async fn test_delivery_posts_payload() {
        let fetcher = Scripted::new(Some(201));
        let delivery = HttpDelivery::new(fetcher.clone(), endpoint());

        delivery.deliver(&item()).await.unwrap();

        let seen = fetcher.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].url, "https://app.example.com/api/forms");
        assert_eq!(seen[0].body.as_deref(), Some(&b"{\"name\":\"ada\"}"[..]));
        assert_eq!(seen[0].headers.get("x-sync-tag").map(String::as_str), Some("form-submission"));
        assert_eq!(seen[0].headers.get("x-sync-item").map(String::as_str), Some("7"));
    }

    #[tokio::test]
    async fn test_delivery_fails_on_error_status() {
        let delivery = HttpDelivery::new(Scripted::new(Some(503)), endpoint());
        let err = delivery.deliver(&item()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_delivery_fails_when_offline() {
        let delivery = HttpDelivery::new(Scripted::new(None), endpoint());
        assert!(delivery.deliver(&item()).await.is_err());
    }

    #[test]
    fn test_handlers_cover_every_endpoint() {
        let config = AppConfig { origin: "https://app.example.com".into(), ..Default::default() };
        let handlers = delivery_handlers(&config, Scripted::new(Some(200))).unwrap();

        let tags: Vec<&str> = handlers.iter().map(|(tag, _)| tag.as_str()).collect();
        assert_eq!(tags, vec!["analytics-batch", "form-submission", "offline-actions", "user-data"]);
    }
}
