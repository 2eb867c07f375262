//! Shared error handling, configuration, and canonicalization helpers for the
//! real-time event broadcasting engine.

pub mod canonical;
pub mod config;
pub mod error;

pub use config::{BroadcastConfig, BroadcasterConfig, RouterCacheConfig};
pub use error::{Error, Result};
