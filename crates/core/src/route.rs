//! Route classification: request URL to caching strategy and partition.
//!
//! Pattern sets are evaluated in a fixed order and the first match wins:
//!
//! 1. static assets → cache-first, "static"
//! 2. critical endpoints → network-first, "api"
//! 3. content endpoints → stale-while-revalidate, "api"
//! 4. anything else → network-first, "dynamic"
//!
//! Navigation requests bypass the patterns entirely and get the
//! navigation fallback strategy on the "dynamic" partition.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::config::AppConfig;
use crate::http::RequestMode;

pub const STATIC: &str = "static";
pub const DYNAMIC: &str = "dynamic";
pub const API: &str = "api";

/// Caching algorithm applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NavigationFallback,
}

/// Classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub strategy: Strategy,
    /// Partition category ("static", "dynamic" or "api").
    pub partition: &'static str,
}

impl Route {
    const fn new(strategy: Strategy, partition: &'static str) -> Self {
        Self { strategy, partition }
    }
}

const DEFAULT_ROUTE: Route = Route::new(Strategy::NetworkFirst, DYNAMIC);
const NAVIGATION_ROUTE: Route = Route::new(Strategy::NavigationFallback, DYNAMIC);

#[derive(Debug, Clone)]
struct RoutePattern {
    matcher: Regex,
    route: Route,
}

/// Ordered, precompiled route table.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    patterns: Vec<RoutePattern>,
}

impl RouteClassifier {
    /// Compile the three pattern sets in precedence order.
    pub fn new(
        static_patterns: &[String], network_first_patterns: &[String], stale_while_revalidate_patterns: &[String],
    ) -> Result<Self, regex::Error> {
        let groups = [
            (static_patterns, Route::new(Strategy::CacheFirst, STATIC)),
            (network_first_patterns, Route::new(Strategy::NetworkFirst, API)),
            (stale_while_revalidate_patterns, Route::new(Strategy::StaleWhileRevalidate, API)),
        ];

        let mut patterns = Vec::new();
        for (sources, route) in groups {
            for source in sources {
                patterns.push(RoutePattern { matcher: Regex::new(source)?, route });
            }
        }

        Ok(Self { patterns })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Self::new(&config.static_patterns, &config.network_first_patterns, &config.stale_while_revalidate_patterns)
            .map_err(|e| Error::InvalidInput(format!("route pattern: {e}")))
    }

    /// Classify a URL. Absolute URLs are reduced to path and query first.
    ///
    /// Never fails: unmatched URLs get the default network-first route.
    pub fn classify(&self, url: &str) -> Route {
        let target = match url::Url::parse(url) {
            Ok(parsed) => match parsed.query() {
                Some(query) => format!("{}?{}", parsed.path(), query),
                None => parsed.path().to_string(),
            },
            Err(_) => url.to_string(),
        };

        self.patterns
            .iter()
            .find(|p| p.matcher.is_match(&target))
            .map_or(DEFAULT_ROUTE, |p| p.route)
    }

    /// Classify with the navigation override applied.
    pub fn classify_request(&self, url: &str, mode: RequestMode) -> Route {
        if mode == RequestMode::Navigate {
            return NAVIGATION_ROUTE;
        }
        self.classify(url)
    }
}
