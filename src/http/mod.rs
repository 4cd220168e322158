//! Request/response values and the network capability.

mod error;
mod network;
mod types;

pub use error::CacheError;
pub use network::{HttpNetwork, Network};
pub use types::{resolve, Request, RequestKey, Response};
