//! Failure kinds of cache population and network fetches.

/// Errors callers may need to tell apart.
///
/// These travel inside `color_eyre::Report`; recover them with
/// `report.downcast_ref::<CacheError>()`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// The request never produced a response (connection refused, timeout, ...).
  #[error("network error fetching {url}: {message}")]
  Network { url: String, message: String },

  /// A response arrived but is not a 2xx, so it may not be cached.
  #[error("bad response status {status} for {url}")]
  BadStatus { url: String, status: u16 },

  /// The same request appears twice in one batch.
  #[error("duplicate request in batch: {url}")]
  DuplicateRequest { url: String },

  /// Only http and https requests can be cached.
  #[error("unsupported scheme '{scheme}' in {url}")]
  UnsupportedScheme { url: String, scheme: String },

  /// The identifier does not resolve to a URL.
  #[error("invalid asset identifier '{identifier}': {message}")]
  InvalidIdentifier { identifier: String, message: String },
}
