//! Network side of waystation.
//!
//! This crate provides the reqwest fetcher the engine reads through and the
//! HTTP delivery handlers that drain sync queues.

pub mod fetch;
pub mod sync;

pub use fetch::{FetchClient, FetchConfig};
pub use sync::{HttpDelivery, delivery_handlers};
