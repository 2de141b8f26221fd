//! Scripted network stub shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::Error;
use crate::http::{Fetcher, Request, Response};

/// Answers from a URL → response table; unknown URLs get a 404.
#[derive(Debug, Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, Response>>,
    failing: Mutex<Vec<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
    held: Mutex<Vec<String>>,
    released: AtomicBool,
    release: Notify,
}

impl StubFetcher {
    pub fn online() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        let stub = Self::default();
        stub.set_offline(true);
        stub
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Script a response for an absolute URL.
    pub fn respond(&self, url: &str, status: u16, body: &str) {
        let response = Response::network(status, BTreeMap::new(), body.to_string());
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    /// Make one URL fail at the network level while others keep working.
    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().push(url.to_string());
    }

    /// Park fetches of `url` until [`release`](Self::release) is called.
    pub fn hold(&self, url: &str) {
        self.held.lock().unwrap().push(url.to_string());
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        self.calls.lock().unwrap().push(request.url.clone());

        let held = self.held.lock().unwrap().contains(&request.url);
        while held && !self.released.load(Ordering::SeqCst) {
            let notified = self.release.notified();
            if self.released.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }

        if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&request.url) {
            return Err(Error::HttpError(format!("network error: {} unreachable", request.url)));
        }

        let routes = self.routes.lock().unwrap();
        Ok(routes
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Response::network(404, BTreeMap::new(), "not found")))
    }
}
