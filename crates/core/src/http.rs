//! Request/response types and the network fetch capability.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Error;

/// How the host issued the request. Only `Navigate` changes routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// A full-page navigation.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// An inbound request handed to the engine.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Absolute, or relative to the configured origin.
    pub url: String,
    pub mode: RequestMode,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>, mode: RequestMode) -> Self {
        Self { method: method.into(), url: url.into(), mode, headers: BTreeMap::new(), body: None }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url, RequestMode::Cors)
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new("GET", url, RequestMode::Navigate)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self { body: Some(body.into()), ..Self::new("POST", url, RequestMode::Cors) }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// Built by the engine (error statuses, offline placeholders).
    Synthetic,
}

/// A response returned to the caller or read from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    /// A response as received from the network.
    pub fn network(status: u16, headers: BTreeMap<String, String>, body: impl Into<Bytes>) -> Self {
        Self { status, headers, body: body.into(), source: ResponseSource::Network }
    }

    /// An engine-generated plain-text response.
    pub fn synthetic(status: u16, message: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/plain; charset=utf-8".to_string());
        headers.insert("x-waystation-synthetic".to_string(), "1".to_string());
        Self { status, headers, body: Bytes::copy_from_slice(message.as_bytes()), source: ResponseSource::Synthetic }
    }

    /// Cache-miss-and-network-failure.
    pub fn request_timeout() -> Self {
        Self::synthetic(408, "Request Timeout: network unavailable and no cached response")
    }

    /// Network-failure-with-no-cache.
    pub fn service_unavailable() -> Self {
        Self::synthetic(503, "Service Unavailable: offline")
    }

    pub fn bad_request(message: &str) -> Self {
        Self::synthetic(400, message)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Network fetch capability injected into the engine.
///
/// `Ok` means a response arrived, whatever its status. `Err` means the
/// network could not be reached (offline, DNS, timeout).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_constructors() {
        let req = Request::navigate("/about");
        assert!(req.is_navigation());
        assert!(req.is_get());

        let req = Request::post("/api/forms", "name=a").with_header("Content-Type", "text/plain");
        assert!(!req.is_get());
        assert_eq!(req.headers.get("content-type").map(String::as_str), Some("text/plain"));
    }

    #[test]
    fn test_synthetic_responses() {
        let resp = Response::request_timeout();
        assert_eq!(resp.status, 408);
        assert_eq!(resp.source, ResponseSource::Synthetic);
        assert!(!resp.is_success());
        assert_eq!(resp.header("Content-Type"), Some("text/plain; charset=utf-8"));

        assert_eq!(Response::service_unavailable().status, 503);
    }

    #[test]
    fn test_mode_serde() {
        let mode: RequestMode = serde_json::from_str("\"navigate\"").unwrap();
        assert_eq!(mode, RequestMode::Navigate);
        let mode: RequestMode = serde_json::from_str("\"same-origin\"").unwrap();
        assert_eq!(mode, RequestMode::SameOrigin);
    }
}
