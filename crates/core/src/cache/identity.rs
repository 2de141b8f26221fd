//! Request identity: the normalized key a cache entry is stored under.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Error type for URL normalization failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Normalize a URL string for consistent caching.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Resolve against `origin` (absolute inputs keep their own scheme and host)
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn normalize_url(input: &str, origin: &Url) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    // Absolute inputs replace the base entirely, so one join covers both forms.
    let mut parsed = origin.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let lowered = host.to_lowercase();
        parsed
            .set_host(Some(&lowered))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}

/// Method plus normalized URL. One cache entry exists per identity per partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub method: String,
    pub url: String,
}

impl RequestIdentity {
    /// Build an identity from a raw method and URL.
    pub fn resolve(method: &str, url: &str, origin: &Url) -> Result<Self, UrlError> {
        let normalized = normalize_url(url, origin)?;
        Ok(Self { method: method.trim().to_ascii_uppercase(), url: normalized.into() })
    }

    /// Shorthand for a GET identity.
    pub fn get(url: &str, origin: &Url) -> Result<Self, UrlError> {
        Self::resolve("GET", url, origin)
    }

    /// Path plus `?query` of the URL, which is what route patterns see.
    pub fn path_and_query(&self) -> String {
        match Url::parse(&self.url) {
            Ok(url) => match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            },
            Err(_) => self.url.clone(),
        }
    }

    /// Fixed-length storage key for this identity.
    pub fn storage_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
