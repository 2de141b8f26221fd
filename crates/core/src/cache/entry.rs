//! Stored cache entries and their on-disk encoding.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::identity::RequestIdentity;
use crate::http::{Response, ResponseSource};

/// A response stored in a partition under its request identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestIdentity,
    pub stored_at: DateTime<Utc>,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "bytes_base64")]
    pub body: Bytes,
}

impl CacheEntry {
    pub fn new(key: RequestIdentity, response: &Response, stored_at: DateTime<Utc>) -> Self {
        Self { key, stored_at, status: response.status, headers: response.headers.clone(), body: response.body.clone() }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.stored_at
    }

    /// Fresh while `now - stored_at < max_age`. Without a max age an entry never expires.
    pub fn is_fresh(&self, max_age: Option<Duration>, now: DateTime<Utc>) -> bool {
        match max_age {
            Some(max_age) => self.age(now) < max_age,
            None => true,
        }
    }

    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            source: ResponseSource::Cache,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

pub(crate) mod bytes_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map(Bytes::from).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn entry(stored_at: DateTime<Utc>) -> CacheEntry {
        let origin = Url::parse("https://app.example.com").unwrap();
        let key = RequestIdentity::get("/api/news", &origin).unwrap();
        let response = Response::network(200, BTreeMap::new(), Bytes::from_static(b"\x00\xffbinary"));
        CacheEntry::new(key, &response, stored_at)
    }

    #[test]
    fn test_encode_preserves_binary_body() {
        let original = entry(Utc::now());
        let decoded = CacheEntry::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Utc::now();
        let max_age = Some(Duration::seconds(300));

        assert!(entry(now - Duration::seconds(299)).is_fresh(max_age, now));
        assert!(!entry(now - Duration::seconds(300)).is_fresh(max_age, now));
        assert!(entry(now - Duration::days(365)).is_fresh(None, now));
    }

    #[test]
    fn test_zero_max_age_is_never_fresh() {
        let now = Utc::now();
        assert!(!entry(now).is_fresh(Some(Duration::zero()), now));
    }

    #[test]
    fn test_to_response_marks_cache_source() {
        let resp = entry(Utc::now()).to_response();
        assert_eq!(resp.source, ResponseSource::Cache);
        assert_eq!(resp.status, 200);
    }
}
