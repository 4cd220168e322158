use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::CacheError;

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: HeaderMap::new(),
    }
  }

  /// Key this request would be stored under, if it can be cached at all.
  ///
  /// Only GET requests match cache entries.
  pub fn cache_key(&self) -> Option<RequestKey> {
    if self.method == Method::GET {
      Some(RequestKey::from_url(&self.url))
    } else {
      None
    }
  }
}

/// Canonical request form used as the cache key: absolute URL, no fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn from_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(url.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// A response, either fresh from the network or read back from a cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  /// Canonical reason phrase for `status`. HTTP/1.1 reason phrases sent by
  /// the server are not exposed by the client, and HTTP/2 has none.
  pub status_text: String,
  /// Final URL after redirects
  pub url: Url,
  /// Header values as sent; they need not be ASCII or UTF-8
  pub headers: Vec<(String, Vec<u8>)>,
  pub body: Vec<u8>,
}

impl Response {
  /// 2xx, the only responses a batch insert accepts.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&[u8]> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_slice())
  }
}

/// Resolve an asset identifier (e.g. "./index.html") against the origin.
pub fn resolve(origin: &Url, identifier: &str) -> Result<Url, CacheError> {
  let url = origin
    .join(identifier)
    .map_err(|e| CacheError::InvalidIdentifier {
      identifier: identifier.to_string(),
      message: e.to_string(),
    })?;

  match url.scheme() {
    "http" | "https" => Ok(url),
    scheme => Err(CacheError::UnsupportedScheme {
      scheme: scheme.to_string(),
      url: url.to_string(),
    }),
  }
}
