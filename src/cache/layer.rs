//! Cache layer that orchestrates batch population with network fetching.

use color_eyre::Result;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::traits::{CacheResult, CacheStorage, CacheStore};
use crate::http::{resolve, CacheError, Network, Request, RequestKey, Response};

/// Cache layer over a storage backend.
///
/// Identifiers handed to [`CacheLayer::add_all`] resolve against `origin`.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  origin: Url,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, origin: Url) -> Self {
    Self {
      storage: Arc::new(storage),
      origin,
    }
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Open a store by name, creating it if absent.
  pub fn open(&self, name: &str) -> Result<S::Store> {
    self.storage.open(name)
  }

  /// Fetch every identifier and store all responses, or none of them.
  ///
  /// 1. Resolve identifiers against the origin; reject duplicates
  /// 2. Fetch all of them concurrently
  /// 3. Any transport failure or non-2xx status fails the whole batch
  /// 4. Write the batch in one transaction
  ///
  /// Returns the number of entries written.
  pub async fn add_all<N: Network>(
    &self,
    store: &S::Store,
    network: &N,
    identifiers: &[String],
  ) -> Result<usize> {
    let mut seen = HashSet::new();
    let mut requests = Vec::with_capacity(identifiers.len());

    for identifier in identifiers {
      let request = Request::get(resolve(&self.origin, identifier)?);
      let key = RequestKey::from_url(&request.url);
      if !seen.insert(key.clone()) {
        return Err(
          CacheError::DuplicateRequest {
            url: key.to_string(),
          }
          .into(),
        );
      }
      requests.push((key, request));
    }

    let entries = try_join_all(
      requests
        .into_iter()
        .map(|(key, request)| fetch_asset(network, key, request)),
    )
    .await?;

    store.put_all(&entries)?;

    Ok(entries.len())
  }

  /// Look the request up across all stores.
  pub fn match_request(&self, request: &Request) -> Result<Option<CacheResult<Response>>> {
    Ok(self.storage.match_request(request)?.map(CacheResult::from))
  }
}

/// Fetch one asset; anything but a 2xx response is a failure.
async fn fetch_asset<N: Network>(
  network: &N,
  key: RequestKey,
  request: Request,
) -> Result<(RequestKey, Response)> {
  let response = network.fetch(&request).await?;
  if !response.is_success() {
    return Err(
      CacheError::BadStatus {
        url: request.url.to_string(),
        status: response.status,
      }
      .into(),
    );
  }

  debug!(url = %request.url, bytes = response.body.len(), "fetched asset");
  Ok((key, response))
}
