//! Core types for the caching system.

use chrono::{DateTime, Utc};

use crate::http::Response;

/// A response read back from a cache store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// The stored response snapshot
  pub response: Response,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// Result from a fetch, including the response and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data served from the cache entry matching the request.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Data synthesized locally because nothing else was available.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: None,
    }
  }
}

impl CacheResult<Option<Response>> {
  /// The cached app shell served in place of an HTML page.
  pub fn app_shell(cached: Option<CachedResponse>) -> Self {
    let cached_at = cached.as_ref().map(|c| c.cached_at);
    Self {
      data: cached.map(|c| c.response),
      source: CacheSource::AppShell,
      cached_at,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Cached copy of the requested resource (network unavailable)
  Cache,
  /// Cached root page standing in for an HTML request (network unavailable)
  AppShell,
  /// Offline mode - nothing cached, synthesized 503
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::AppShell => write!(f, "app-shell"),
      CacheSource::Offline => write!(f, "offline"),
    }
  }
}
