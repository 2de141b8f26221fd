//! Core engine for waystation, an offline-first HTTP caching and background sync layer.
//!
//! This crate provides:
//! - A namespaced durable key-value store (SQLite, plus an in-memory map)
//! - Versioned cache partitions and the four caching strategies
//! - Cache lifecycle: precache, activation cleanup, age pruning
//! - A durable per-tag task queue with ordered delivery
//! - The control surface that dispatches host triggers
//! - Unified error types and configuration

pub mod cache;
pub mod config;
pub mod control;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod manager;
pub mod queue;
pub mod route;
pub mod store;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AppConfig;
pub use control::{ControlMessage, ControlSurface, LifecycleState, Outcome, Trigger};
pub use error::Error;
pub use http::{Fetcher, Request, RequestMode, Response, ResponseSource};
pub use manager::CacheManager;
pub use queue::{DeliveryHandler, QueueItem, RetryableError, TaskQueue};
pub use store::{KvStore, MemoryStore, SqliteStore};
