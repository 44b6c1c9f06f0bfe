//! Scripted fetcher for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use super::Fetcher;
use crate::http::{Request, Response};

pub const ORIGIN: &str = "http://localhost:5000";

/// Answers requests from a fixed table; anything else is a network failure.
#[derive(Default)]
pub struct MockFetcher {
  responses: Mutex<HashMap<String, Response>>,
  calls: AtomicUsize,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer `target` (absolute, or a path on `ORIGIN`) with `response`.
  pub fn respond(self, target: &str, response: Response) -> Self {
    self.set(target, response);
    self
  }

  pub fn set(&self, target: &str, response: Response) {
    let url = resolve(target);
    self.responses.lock().unwrap().insert(url, response);
  }

  /// Simulate losing the network for every request.
  pub fn go_offline(&self) {
    self.responses.lock().unwrap().clear();
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

fn resolve(target: &str) -> String {
  Url::parse(ORIGIN).unwrap().join(target).unwrap().to_string()
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self
      .responses
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .ok_or_else(|| eyre!("network unreachable: {}", request.url))
  }
}
