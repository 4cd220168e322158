//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::{Request, RequestKey, Response};

/// The cache capability: a set of named stores.
pub trait CacheStorage: Send + Sync {
  type Store: CacheStore;

  /// Open a store by name, creating it if absent.
  fn open(&self, name: &str) -> Result<Self::Store>;

  /// Whether a store with this name exists.
  fn has(&self, name: &str) -> Result<bool>;

  /// Whether a batch has ever been committed into the named store. A store
  /// left behind by a failed install exists but is not installed.
  fn installed(&self, name: &str) -> Result<bool>;

  /// Store names in creation order.
  fn names(&self) -> Result<Vec<String>>;

  /// Look the request up in every store, oldest store first.
  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>>;
}

/// One named key→response mapping.
pub trait CacheStore: Send + Sync {
  fn name(&self) -> &str;

  /// Write a batch of entries atomically and mark the store installed.
  /// Existing entries with the same key are replaced.
  fn put_all(&self, entries: &[(RequestKey, Response)]) -> Result<()>;

  fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>>;

  /// Stored entries in insertion order.
  fn keys(&self) -> Result<Vec<CacheEntryInfo>>;
}

/// A response read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Summary of a stored entry, without the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryInfo {
  pub key: RequestKey,
  pub status: u16,
  pub size: usize,
  /// Hex SHA-256 of the stored body
  pub digest: String,
  pub cached_at: DateTime<Utc>,
}

/// Result of serving a request, including metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

impl From<CachedResponse> for CacheResult<Response> {
  fn from(cached: CachedResponse) -> Self {
    Self::from_cache(cached.response, cached.cached_at)
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from a cache store
  Cache,
  /// Cache miss, fetched from the network
  Network,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Cache => f.write_str("cache"),
      Self::Network => f.write_str("network"),
    }
  }
}
