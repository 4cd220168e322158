//! Named cache stores for offline support.
//!
//! This module provides the cache capability the offline handler relies on:
//! - Named stores, created on first open and persisted in SQLite
//! - All-or-nothing batch population from the network
//! - Lookup by canonical request key across every store

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage, CacheStore};

#[cfg(test)]
pub use traits::CachedResponse;
