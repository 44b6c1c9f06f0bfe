//! Lifecycle handler for the offline cache.
//!
//! The worker reacts to the three events a host dispatches:
//! - `install`: pre-cache the static assets into the current cache
//! - `activate`: delete every other cache generation
//! - `fetch`: network first, cache as fallback, 503 when nothing is left

mod lifecycle;

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage, CachedResponse};
use crate::http::{Request, RequestKey, Response};
use crate::net::Fetcher;

pub use lifecycle::{Host, WorkerState};

/// Settings injected into the worker at construction.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Origin of the page; requests to other origins are left alone
  pub origin: Url,
  pub cache_name: String,
  /// Paths (or URLs) pre-cached on install
  pub static_assets: Vec<String>,
  /// Substrings marking external URLs that are intercepted anyway
  pub poster_hosts: Vec<String>,
  pub offline_body: String,
}

impl WorkerConfig {
  /// Cache identity of the root page, served for HTML requests when offline.
  fn app_shell(&self) -> RequestKey {
    let mut url = self.origin.clone();
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);

    RequestKey {
      method: "GET".to_string(),
      url: url.to_string(),
    }
  }
}

/// What the worker did with a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not intercepted; the request goes to the network untouched
  Passthrough,
  /// Intercepted; the page gets this response (absent when the app shell
  /// was wanted but never cached)
  Respond(CacheResult<Option<Response>>),
}

/// Network-first caching worker.
pub struct ServiceWorker<S: CacheStorage, F: Fetcher, H: Host> {
  config: WorkerConfig,
  cache: CacheLayer<S>,
  fetcher: Arc<F>,
  host: H,
  state: Mutex<WorkerState>,
}

impl<S, F, H> ServiceWorker<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher,
  H: Host,
{
  pub fn new(config: WorkerConfig, storage: Arc<S>, fetcher: Arc<F>, host: H) -> Self {
    let cache = CacheLayer::new(storage, config.cache_name.clone());

    Self {
      config,
      cache,
      fetcher,
      host,
      state: Mutex::new(WorkerState::Parsed),
    }
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn fetcher(&self) -> &Arc<F> {
    &self.fetcher
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(WorkerState::Redundant)
  }

  fn set_state(&self, new_state: WorkerState) {
    if let Ok(mut state) = self.state.lock() {
      let old_state = *state;
      debug!(from = %old_state, to = %new_state, "Worker state changed");
      *state = new_state;
    }
  }

  /// Handle the install event: pre-cache every static asset, then ask the
  /// host to activate right away.
  ///
  /// Any failed asset fails the whole install; the opened cache stays empty.
  pub async fn install(&self) -> Result<()> {
    self.set_state(WorkerState::Installing);

    if let Err(e) = self.precache().await {
      warn!(cache = %self.config.cache_name, error = %e, "Install failed");
      self.set_state(WorkerState::Redundant);
      return Err(e);
    }

    self.set_state(WorkerState::Installed);
    self.host.skip_waiting().await
  }

  async fn precache(&self) -> Result<()> {
    let requests = self
      .config
      .static_assets
      .iter()
      .map(|asset| Request::get(&self.config.origin, asset))
      .collect::<Result<Vec<_>>>()?;

    self.cache.open().await?;
    self.cache.add_all(self.fetcher.as_ref(), &requests).await
  }

  /// Handle the activate event: drop stale caches, then take control of
  /// open pages.
  ///
  /// A worker whose install failed never activates.
  pub async fn activate(&self) -> Result<()> {
    if self.state() == WorkerState::Redundant {
      return Err(eyre!(
        "Cannot activate {}: install failed",
        self.config.cache_name
      ));
    }

    self.set_state(WorkerState::Activating);
    self.cache.prune().await?;
    self.set_state(WorkerState::Activated);
    self.host.claim_clients().await
  }

  /// Whether a request is handled by the worker at all.
  pub fn intercepts(&self, request: &Request) -> bool {
    if !request.is_get() {
      return false;
    }

    let is_external = request.url.origin() != self.config.origin.origin();
    let is_poster_image = self
      .config
      .poster_hosts
      .iter()
      .any(|host| request.url.as_str().contains(host.as_str()));

    !is_external || is_poster_image
  }

  /// Handle a fetch event.
  pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
    if !self.intercepts(request) {
      debug!(request = %request.key(), "Passing through");
      return FetchOutcome::Passthrough;
    }

    FetchOutcome::Respond(self.network_first(request).await)
  }

  async fn network_first(&self, request: &Request) -> CacheResult<Option<Response>> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.status == 200 {
          self.cache.put_in_background(request.key(), response.clone());
        }
        CacheResult::from_network(Some(response))
      }
      Err(e) => {
        debug!(request = %request.key(), error = %e, "Network failed, trying cache");
        self.fallback(request).await
      }
    }
  }

  async fn fallback(&self, request: &Request) -> CacheResult<Option<Response>> {
    if let Some(cached) = self.lookup(&request.key()).await {
      return CacheResult::from_cache(Some(cached.response), cached.cached_at);
    }

    if request.accepts_html() {
      return CacheResult::app_shell(self.lookup(&self.config.app_shell()).await);
    }

    CacheResult::offline(Some(self.offline_response()))
  }

  /// Cache lookup where a storage error counts as a miss.
  async fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    match self.cache.lookup(key).await {
      Ok(found) => found,
      Err(e) => {
        debug!(request = %key, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  fn offline_response(&self) -> Response {
    Response::new(503, "Service Unavailable", self.config.offline_body.clone())
      .with_header("content-type", "text/plain; charset=utf-8")
  }

  /// Wait for background cache writes to finish.
  pub async fn flush(&self) {
    self.cache.flush().await;
  }
}
