//! Request interception: the offline handler and the host that drives it.

mod handler;
mod host;

use color_eyre::Result;

use crate::cache::CacheResult;
use crate::http::{Request, Response};

pub use handler::OfflineCacheHandler;
pub use host::Host;

/// A component that intercepts the host's lifecycle events.
#[allow(async_fn_in_trait)]
pub trait RequestInterceptor {
  /// Install event. The host treats the worker as installed only once this
  /// resolves successfully.
  async fn on_install(&self) -> Result<()>;

  /// Fetch event for one outgoing request.
  async fn on_fetch(&self, request: &Request) -> Result<CacheResult<Response>>;
}
