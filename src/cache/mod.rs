//! Versioned response cache for offline support.
//!
//! This module provides:
//! - A storage namespace of named caches (one per cache generation)
//! - SQLite and in-memory storage backends
//! - A layer that scopes writes to the current generation, stores
//!   pre-cached assets atomically and prunes stale generations

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, CachedResponse};
