//! reqwest-backed network fetcher.
//!
//! ### Behaviour
//! - Any HTTP status is a successful fetch; the engine decides what to cache.
//! - Connection failures map to `HTTP_ERROR`, elapsed timeouts to `FETCH_TIMEOUT`.
//! - Response header names are lowercased; repeated headers are joined with `, `.
//! - Max redirects: 5

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, Url, header};

use waystation_core::{AppConfig, Error, Fetcher, Request, Response};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "waystation/0.1")
    pub user_agent: String,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { user_agent: "waystation/0.1".to_string(), timeout: Duration::from_millis(20000), max_redirects: 5 }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), timeout: config.timeout(), ..Self::default() }
    }
}

/// HTTP client implementing the engine's [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    async fn send(&self, request: &Request) -> Result<Response, Error> {
        let start = Instant::now();
        let url = Url::parse(&request.url).map_err(|e| Error::InvalidUrl(format!("{}: {}", request.url, e)))?;
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::InvalidInput(format!("invalid method: {}", request.method)))?;

        let mut builder = self.http.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_send_error)?;

        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let body = response.bytes().await.map_err(map_send_error)?;

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status,
            bytes = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fetched"
        );

        Ok(Response::network(status, headers, body))
    }
}

#[async_trait]
impl Fetcher for FetchClient {
    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        self.send(request).await
    }
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::FetchTimeout(format!("network timeout: {}", e))
    } else {
        Error::HttpError(format!("network error: {}", e))
    }
}

fn flatten_headers(headers: &header::HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port and return its base URL.
    async fn serve_once(raw: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(raw.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "waystation/0.1");
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { user_agent: "probe/2".into(), timeout_ms: 1500, ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.user_agent, "probe/2");
        assert_eq!(config.timeout, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_fetch_client_new() {
        assert!(FetchClient::new(FetchConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_headers() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Trace: a\r\nX-Trace: b\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}",
        )
        .await;
        let client = FetchClient::new(FetchConfig::default()).unwrap();

        let response = client.fetch(&Request::get(format!("{base}/api/news"))).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "{\"ok\":true}");
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("x-trace"), Some("a, b"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_an_error() {
        let base =
            serve_once("HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\ndown").await;
        let client = FetchClient::new(FetchConfig::default()).unwrap();

        let response = client.fetch(&Request::get(base)).await.unwrap();
        assert_eq!(response.status, 500);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = FetchClient::new(FetchConfig::default()).unwrap();
        let result = client.fetch(&Request::get(format!("http://{addr}/"))).await;
        assert!(matches!(result, Err(Error::HttpError(_))));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client =
            FetchClient::new(FetchConfig { timeout: Duration::from_millis(200), ..Default::default() }).unwrap();
        let result = client.fetch(&Request::get(format!("http://{addr}/"))).await;
        assert!(matches!(result, Err(Error::FetchTimeout(_))));
    }

    #[tokio::test]
    async fn test_relative_url_rejected() {
        let client = FetchClient::new(FetchConfig::default()).unwrap();
        let result = client.fetch(&Request::get("/relative")).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
