//! Network fetcher used for live requests.

mod client;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use color_eyre::Result;

use crate::http::{Request, Response};

pub use client::HttpFetcher;

/// Performs a request against the network.
///
/// An `Err` means the network could not produce a response at all. HTTP
/// error statuses are successful fetches; callers inspect the status.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}
