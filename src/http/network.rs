//! Network capability: perform a request, no caching involved.

use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use super::error::CacheError;
use super::types::{Request, Response};

const USER_AGENT: &str = concat!("precache/", env!("CARGO_PKG_VERSION"));

/// Something that can send a request and hand back the response.
///
/// HTTP error statuses are responses, not errors. Only transport failures
/// fail the future.
#[allow(async_fn_in_trait)]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    debug!(method = %request.method, url = %request.url, "network fetch");

    let network_error = |e: reqwest::Error| CacheError::Network {
      url: request.url.to_string(),
      message: e.to_string(),
    };

    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(request.headers.clone())
      .send()
      .await
      .map_err(network_error)?;

    let status = response.status();
    let url = response.url().clone();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
      .collect();

    let body = response.bytes().await.map_err(network_error)?.to_vec();

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      url,
      headers,
      body,
    })
  }
}
