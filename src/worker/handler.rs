//! The offline cache handler: pre-cache on install, cache-first on fetch.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::RequestInterceptor;
use crate::cache::{CacheLayer, CacheResult, CacheStorage, CacheStore};
use crate::config::PrecacheManifest;
use crate::http::{Network, Request, Response};

/// Pre-caches the manifest's assets on install and serves requests
/// cache-first, falling back to the network on a miss.
///
/// A miss never writes to the cache.
pub struct OfflineCacheHandler<S: CacheStorage, N: Network> {
  manifest: PrecacheManifest,
  cache: CacheLayer<S>,
  network: Arc<N>,
}

impl<S: CacheStorage, N: Network> OfflineCacheHandler<S, N> {
  pub fn new(manifest: PrecacheManifest, cache: CacheLayer<S>, network: Arc<N>) -> Self {
    Self {
      manifest,
      cache,
      network,
    }
  }

  pub fn manifest(&self) -> &PrecacheManifest {
    &self.manifest
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  /// Whether an earlier install of this manifest's store completed. A
  /// store left behind by a failed install does not count.
  pub fn is_installed(&self) -> Result<bool> {
    self.cache.storage().installed(&self.manifest.cache_name)
  }

  /// Open the named store and populate it with every asset.
  ///
  /// Returns the number of cached assets. Fails as a whole if any asset
  /// fails.
  pub async fn handle_install(&self) -> Result<usize> {
    info!(
      cache = %self.manifest.cache_name,
      assets = self.manifest.assets.len(),
      "installing"
    );

    let store = self.cache.open(&self.manifest.cache_name)?;
    let count = self
      .cache
      .add_all(&store, self.network.as_ref(), &self.manifest.assets)
      .await?;

    info!(cache = %store.name(), count, "install complete");
    Ok(count)
  }

  /// Serve from the cache when possible, otherwise from the network.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    match self.cache.match_request(request) {
      Ok(Some(hit)) => {
        debug!(url = %request.url, "cache hit");
        return Ok(hit);
      }
      Ok(None) => debug!(url = %request.url, "cache miss"),
      // A failed lookup counts as a miss
      Err(e) => warn!(url = %request.url, error = %e, "cache lookup failed"),
    }

    let response = self.network.fetch(request).await?;
    Ok(CacheResult::from_network(response))
  }
}

impl<S: CacheStorage, N: Network> RequestInterceptor for OfflineCacheHandler<S, N> {
  async fn on_install(&self) -> Result<()> {
    self.handle_install().await.map(|_| ())
  }

  async fn on_fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    self.handle_fetch(request).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, CachedResponse, SqliteStorage};
  use crate::http::{resolve, CacheError, HttpNetwork};
  use color_eyre::eyre::eyre;
  use reqwest::header::HeaderValue;
  use std::time::Duration;
  use url::Url;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  type Handler = OfflineCacheHandler<SqliteStorage, HttpNetwork>;

  fn handler(server: &MockServer, assets: &[&str]) -> Handler {
    let origin = Url::parse(&format!("{}/", server.uri())).unwrap();
    let manifest = PrecacheManifest {
      cache_name: "simple-word-counter-pwa".to_string(),
      assets: assets.iter().map(|s| s.to_string()).collect(),
    };
    let cache = CacheLayer::new(SqliteStorage::open_in_memory().unwrap(), origin);
    let network = Arc::new(HttpNetwork::new(Duration::from_secs(5)).unwrap());
    OfflineCacheHandler::new(manifest, cache, network)
  }

  fn request(handler: &Handler, identifier: &str) -> Request {
    Request::get(resolve(handler.cache().origin(), identifier).unwrap())
  }

  #[tokio::test]
  async fn installed_assets_are_served_without_network() {
    let server = MockServer::start().await;
    for (at, body) in [("/", "root"), ("/index.html", "<html>index</html>")] {
      Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        // Only the install fetch may reach the network
        .expect(1)
        .mount(&server)
        .await;
    }

    let handler = handler(&server, &["./", "./index.html"]);
    assert_eq!(handler.handle_install().await.unwrap(), 2);

    for identifier in ["./", "./index.html"] {
      let served = handler
        .handle_fetch(&request(&handler, identifier))
        .await
        .unwrap();
      assert_eq!(served.source, CacheSource::Cache);
      assert!(served.cached_at.is_some());
    }
  }

  #[tokio::test]
  async fn cached_body_matches_direct_network_fetch() {
    let server = MockServer::start().await;
    let page = "<!doctype html><title>Word counter</title>\u{1F4DD}";
    Mock::given(method("GET"))
      .and(path("/index.html"))
      .respond_with(ResponseTemplate::new(200).set_body_string(page))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/"))
      .respond_with(ResponseTemplate::new(200).set_body_string("root"))
      .mount(&server)
      .await;

    let handler = handler(&server, &["./", "./index.html"]);
    let direct = handler
      .network
      .fetch(&request(&handler, "./index.html"))
      .await
      .unwrap();

    handler.handle_install().await.unwrap();

    let store = handler.cache().open("simple-word-counter-pwa").unwrap();
    let cached = store
      .match_request(&request(&handler, "./index.html"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.body, direct.body);
  }

  #[tokio::test]
  async fn failed_asset_fails_install_and_caches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/pkg/bundle.js"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
      .mount(&server)
      .await;

    let handler = handler(&server, &["./", "./index.html", "./pkg/bundle.js"]);
    let err = handler.handle_install().await.unwrap_err();
    assert!(matches!(
      err.downcast_ref::<CacheError>(),
      Some(CacheError::BadStatus { status: 404, .. })
    ));

    let store = handler.cache().open("simple-word-counter-pwa").unwrap();
    assert!(store.keys().unwrap().is_empty());

    assert!(handler
      .cache()
      .storage()
      .has("simple-word-counter-pwa")
      .unwrap());
    assert!(!handler.is_installed().unwrap());
  }

  #[tokio::test]
  async fn successful_install_marks_store_installed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
      .mount(&server)
      .await;

    let handler = handler(&server, &["./index.html"]);
    assert!(!handler.is_installed().unwrap());
    handler.handle_install().await.unwrap();
    assert!(handler.is_installed().unwrap());
  }

  #[tokio::test]
  async fn miss_goes_to_network_once_and_does_not_populate_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/stats.json"))
      .respond_with(
        ResponseTemplate::new(201)
          .set_body_string("{\"words\":3}")
          .insert_header("x-origin", "live"),
      )
      .expect(1)
      .mount(&server)
      .await;

    let handler = handler(&server, &[]);
    handler.handle_install().await.unwrap();

    let served = handler
      .handle_fetch(&request(&handler, "./api/stats.json"))
      .await
      .unwrap();
    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(served.data.status, 201);
    assert_eq!(served.data.body, b"{\"words\":3}");
    assert_eq!(served.data.header("x-origin"), Some(&b"live"[..]));

    let store = handler.cache().open("simple-word-counter-pwa").unwrap();
    assert!(store.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn repeated_hits_are_identical() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/index.html"))
      .respond_with(ResponseTemplate::new(200).set_body_string("stable"))
      .expect(1)
      .mount(&server)
      .await;

    let handler = handler(&server, &["./index.html"]);
    handler.handle_install().await.unwrap();

    let first = handler
      .handle_fetch(&request(&handler, "./index.html"))
      .await
      .unwrap();
    let second = handler
      .handle_fetch(&request(&handler, "./index.html"))
      .await
      .unwrap();
    assert_eq!(first.data, second.data);
    assert_eq!(first.cached_at, second.cached_at);
  }

  #[tokio::test]
  async fn miss_with_network_failure_propagates() {
    let server = MockServer::start().await;
    let handler = handler(&server, &[]);
    drop(server);

    let unreachable = Request::get(Url::parse("http://127.0.0.1:9/index.html").unwrap());
    let err = handler.handle_fetch(&unreachable).await.unwrap_err();
    assert!(matches!(
      err.downcast_ref::<CacheError>(),
      Some(CacheError::Network { .. })
    ));
  }

  #[tokio::test]
  async fn miss_keeps_non_ascii_header_values() {
    let server = MockServer::start().await;
    let disposition = b"attachment; filename=caf\xc3\xa9.txt";
    Mock::given(method("GET"))
      .and(path("/export.txt"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_string("words")
          .insert_header(
            "content-disposition",
            HeaderValue::from_bytes(disposition).unwrap(),
          ),
      )
      .mount(&server)
      .await;

    let handler = handler(&server, &[]);
    let served = handler
      .handle_fetch(&request(&handler, "./export.txt"))
      .await
      .unwrap();
    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(
      served.data.header("content-disposition"),
      Some(&disposition[..])
    );
  }

  /// Storage whose cross-store lookup always fails.
  struct BrokenLookup(SqliteStorage);

  impl CacheStorage for BrokenLookup {
    type Store = <SqliteStorage as CacheStorage>::Store;

    fn open(&self, name: &str) -> Result<Self::Store> {
      self.0.open(name)
    }

    fn has(&self, name: &str) -> Result<bool> {
      self.0.has(name)
    }

    fn installed(&self, name: &str) -> Result<bool> {
      self.0.installed(name)
    }

    fn names(&self) -> Result<Vec<String>> {
      self.0.names()
    }

    fn match_request(&self, _request: &Request) -> Result<Option<CachedResponse>> {
      Err(eyre!("database disk image is malformed"))
    }
  }

  #[tokio::test]
  async fn failed_lookup_is_treated_as_miss() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/index.html"))
      .respond_with(ResponseTemplate::new(200).set_body_string("live"))
      .expect(1)
      .mount(&server)
      .await;

    let origin = Url::parse(&format!("{}/", server.uri())).unwrap();
    let cache = CacheLayer::new(
      BrokenLookup(SqliteStorage::open_in_memory().unwrap()),
      origin.clone(),
    );
    let network = Arc::new(HttpNetwork::new(Duration::from_secs(5)).unwrap());
    let handler = OfflineCacheHandler::new(PrecacheManifest::default(), cache, network);

    let request = Request::get(resolve(&origin, "./index.html").unwrap());
    let served = handler.handle_fetch(&request).await.unwrap();
    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(served.data.body, b"live");
  }
}
