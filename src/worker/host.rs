use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::RequestInterceptor;
use crate::cache::CacheResult;
use crate::http::{Network, Request, Response};

/// Lifecycle state of the interceptor inside the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Registered, install not yet dispatched
  Parsed,
  Installing,
  /// Install succeeded; fetch events go to the interceptor
  Installed,
  /// Install failed; the interceptor never sees a fetch event
  Redundant,
}

/// Host runtime that dispatches install and fetch events.
///
/// Until install succeeds, requests bypass the interceptor and go straight
/// to the network.
pub struct Host<I: RequestInterceptor, N: Network> {
  interceptor: I,
  network: Arc<N>,
  state: WorkerState,
}

impl<I: RequestInterceptor, N: Network> Host<I, N> {
  pub fn new(interceptor: I, network: Arc<N>) -> Self {
    Self {
      interceptor,
      network,
      state: WorkerState::Parsed,
    }
  }

  /// Host for an interceptor installed in an earlier run.
  pub fn resume(interceptor: I, network: Arc<N>) -> Self {
    Self {
      interceptor,
      network,
      state: WorkerState::Installed,
    }
  }

  #[cfg(test)]
  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Dispatch the install event and wait for it to settle.
  pub async fn install(&mut self) -> Result<()> {
    if self.state == WorkerState::Redundant {
      return Err(eyre!("Worker is redundant after a failed install"));
    }

    self.state = WorkerState::Installing;
    match self.interceptor.on_install().await {
      Ok(()) => {
        self.state = WorkerState::Installed;
        info!("worker installed");
        Ok(())
      }
      Err(e) => {
        self.state = WorkerState::Redundant;
        error!(error = %e, "install failed");
        Err(e)
      }
    }
  }

  /// Dispatch a fetch event, or go to the network when not installed.
  pub async fn fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    if self.state == WorkerState::Installed {
      return self.interceptor.on_fetch(request).await;
    }

    debug!(state = ?self.state, url = %request.url, "not intercepting");
    let response = self.network.fetch(request).await?;
    Ok(CacheResult::from_network(response))
  }
}
