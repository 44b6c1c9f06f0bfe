//! Cache layer bound to the current cache generation.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::storage::CacheStorage;
use super::traits::CachedResponse;
use crate::http::{Request, RequestKey, Response};
use crate::net::Fetcher;

/// Cache layer that scopes storage operations to one cache name.
///
/// Reads go through every cache in the storage; writes always land in the
/// cache named at construction.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
  /// Background writes not yet awaited by `flush`
  pending: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer writing to the cache called `name`.
  pub fn new(storage: Arc<S>, name: impl Into<String>) -> Self {
    Self {
      storage,
      name: name.into(),
      pending: Mutex::new(Vec::new()),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Open the current cache, creating it if absent.
  pub async fn open(&self) -> Result<()> {
    self.storage.open(&self.name).await?;
    info!(cache = %self.name, "Cache opened");
    Ok(())
  }

  /// Fetch every request and store the responses as one unit.
  ///
  /// Fails without writing anything if any fetch fails or any response
  /// is not a 2xx.
  pub async fn add_all<F: Fetcher + ?Sized>(&self, fetcher: &F, requests: &[Request]) -> Result<()> {
    let responses = try_join_all(requests.iter().map(|request| async move {
      let response = fetcher.fetch(request).await?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to cache {}: status {} {}",
          request.url,
          response.status,
          response.status_text
        ));
      }
      Ok::<_, color_eyre::Report>((request.key(), response))
    }))
    .await?;

    self.storage.put_all(&self.name, &responses).await?;
    debug!(cache = %self.name, count = responses.len(), "Stored assets");

    Ok(())
  }

  /// Write a response in the background.
  ///
  /// The caller does not wait for the write; failures are logged and dropped.
  pub fn put_in_background(&self, key: RequestKey, response: Response) {
    let storage = Arc::clone(&self.storage);
    let name = self.name.clone();

    let handle = tokio::spawn(async move {
      let result = async {
        storage.open(&name).await?;
        storage.put(&name, &key, &response).await
      }
      .await;

      match result {
        Ok(()) => debug!(cache = %name, request = %key, "Cached response"),
        Err(e) => debug!(cache = %name, request = %key, error = %e, "Dropped cache write"),
      }
    });

    if let Ok(mut pending) = self.pending.lock() {
      pending.retain(|h| !h.is_finished());
      pending.push(handle);
    }
  }

  /// Wait for every background write started so far.
  pub async fn flush(&self) {
    let handles = match self.pending.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(_) => return,
    };

    join_all(handles).await;
  }

  /// Look up a request across every cache.
  pub async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.storage.match_any(key).await
  }

  /// Delete every cache except the current one. Returns the deleted names.
  pub async fn prune(&self) -> Result<Vec<String>> {
    let stale: Vec<String> = self
      .storage
      .keys()
      .await?
      .into_iter()
      .filter(|name| name != &self.name)
      .collect();

    try_join_all(stale.iter().map(|name| async move {
      info!(cache = %name, "Deleting stale cache");
      self.storage.delete(name).await
    }))
    .await?;

    Ok(stale)
  }
}
