//! Lifecycle states and the signals a worker sends to its host.

use async_trait::async_trait;
use color_eyre::Result;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, no lifecycle event handled yet
  Parsed,
  /// Install event in progress (pre-caching assets)
  Installing,
  /// Assets cached, ready to activate
  Installed,
  /// Activate event in progress (pruning stale caches)
  Activating,
  /// Active and controlling pages
  Activated,
  /// Install failed; this worker will never activate
  Redundant,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

/// The runtime hosting a worker.
#[async_trait]
pub trait Host: Send + Sync {
  /// Activate the freshly installed worker without waiting for older
  /// instances to release their pages.
  async fn skip_waiting(&self) -> Result<()>;

  /// Take control of pages that are already open.
  async fn claim_clients(&self) -> Result<()>;
}
