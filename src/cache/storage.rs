//! Cache storage trait with SQLite and in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::CachedResponse;
use crate::http::{Headers, RequestKey, Response};

/// A namespace of named caches, each mapping request identity to a response.
///
/// Every operation is a suspension point for the caller. Writes are
/// last-write-wins per key; there are no transactions across calls.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist yet.
  async fn open(&self, name: &str) -> Result<()>;

  /// Store a single response, creating the cache if needed.
  async fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several responses as one unit: either all are written or none.
  async fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up a request in one named cache.
  #[allow(dead_code)]
  async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up a request in every cache, oldest cache first.
  async fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Names of all caches in creation order.
  async fn keys(&self) -> Result<Vec<String>>;

  /// Delete a cache and all its entries. Returns whether it existed.
  async fn delete(&self, name: &str) -> Result<bool>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives as long as this value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cinelyon-sw").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named cache generations, in creation order
CREATE TABLE IF NOT EXISTS caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_hash),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_hash ON entries(request_hash);
"#;

fn ensure_cache(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries
         (cache_name, request_hash, method, url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        key.cache_hash(),
        key.method,
        key.url,
        response.status,
        response.status_text,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", key, e))?;

  Ok(())
}

type EntryRow = (u16, String, String, Vec<u8>, String);

fn row_to_cached((status, status_text, headers, body, cached_at): EntryRow) -> Result<CachedResponse> {
  let headers: Headers = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  Ok(CachedResponse {
    response: Response {
      status,
      status_text,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    ensure_cache(&conn, name)
  }

  async fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    ensure_cache(&conn, name)?;
    insert_entry(&conn, name, key, response)
  }

  async fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, name)?;
    for (key, response) in entries {
      insert_entry(&tx, name, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT status, status_text, headers, body, cached_at FROM entries
         WHERE cache_name = ? AND request_hash = ?",
        params![name, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(row_to_cached).transpose()
  }

  async fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT e.status, e.status_text, e.headers, e.body, e.cached_at FROM entries e
         INNER JOIN caches c ON c.name = e.cache_name
         WHERE e.request_hash = ?
         ORDER BY c.id
         LIMIT 1",
        params![key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(row_to_cached).transpose()
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  async fn delete(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    Ok(deleted > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  // Vec keeps creation order for keys() and match_any()
  caches: Mutex<Vec<(String, HashMap<RequestKey, CachedResponse>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_cache<R>(
    &self,
    name: &str,
    f: impl FnOnce(&mut HashMap<RequestKey, CachedResponse>) -> R,
  ) -> Result<R> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let index = match caches.iter().position(|(n, _)| n == name) {
      Some(index) => index,
      None => {
        caches.push((name.to_string(), HashMap::new()));
        caches.len() - 1
      }
    };

    Ok(f(&mut caches[index].1))
  }
}

fn snapshot(response: &Response) -> CachedResponse {
  CachedResponse {
    response: response.clone(),
    cached_at: Utc::now(),
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn open(&self, name: &str) -> Result<()> {
    self.with_cache(name, |_| ())
  }

  async fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.with_cache(name, |entries| {
      entries.insert(key.clone(), snapshot(response));
    })
  }

  async fn put_all(&self, name: &str, new_entries: &[(RequestKey, Response)]) -> Result<()> {
    self.with_cache(name, |entries| {
      for (key, response) in new_entries {
        entries.insert(key.clone(), snapshot(response));
      }
    })
  }

  async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      caches
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, entries)| entries.get(key).cloned()),
    )
  }

  async fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(caches.iter().find_map(|(_, entries)| entries.get(key).cloned()))
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(caches.iter().map(|(name, _)| name.clone()).collect())
  }

  async fn delete(&self, name: &str) -> Result<bool> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let before = caches.len();
    caches.retain(|(n, _)| n != name);
    Ok(caches.len() != before)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(path: &str) -> RequestKey {
    RequestKey {
      method: "GET".to_string(),
      url: format!("http://localhost:5000{}", path),
    }
  }

  fn html(body: &str) -> Response {
    Response::new(200, "OK", body).with_header("content-type", "text/html")
  }

  async fn exercise_put_and_match(storage: &dyn CacheStorage) {
    storage.put("v1", &key("/"), &html("home")).await.unwrap();

    let hit = storage.match_in("v1", &key("/")).await.unwrap().unwrap();
    assert_eq!(hit.response, html("home"));
    assert!(storage.match_in("v1", &key("/other")).await.unwrap().is_none());
    assert!(storage.match_in("v2", &key("/")).await.unwrap().is_none());

    // Overwrite keeps a single entry with the latest value
    storage.put("v1", &key("/"), &html("home v2")).await.unwrap();
    let hit = storage.match_any(&key("/")).await.unwrap().unwrap();
    assert_eq!(hit.response.text(), "home v2");
  }

  async fn exercise_keys_and_delete(storage: &dyn CacheStorage) {
    storage.open("old").await.unwrap();
    storage.put("old", &key("/a"), &html("old a")).await.unwrap();
    storage.open("new").await.unwrap();
    storage.put("new", &key("/a"), &html("new a")).await.unwrap();
    storage.open("new").await.unwrap();

    assert_eq!(storage.keys().await.unwrap(), vec!["old", "new"]);

    // Oldest cache wins
    let hit = storage.match_any(&key("/a")).await.unwrap().unwrap();
    assert_eq!(hit.response.text(), "old a");

    assert!(storage.delete("old").await.unwrap());
    assert!(!storage.delete("old").await.unwrap());
    assert_eq!(storage.keys().await.unwrap(), vec!["new"]);

    let hit = storage.match_any(&key("/a")).await.unwrap().unwrap();
    assert_eq!(hit.response.text(), "new a");
    assert!(storage.match_in("old", &key("/a")).await.unwrap().is_none());
  }

  async fn exercise_put_all(storage: &dyn CacheStorage) {
    let entries = vec![(key("/"), html("home")), (key("/x"), html("x"))];
    storage.put_all("v1", &entries).await.unwrap();
    storage.put_all("v1", &entries).await.unwrap();

    assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
    assert!(storage.match_in("v1", &key("/")).await.unwrap().is_some());
    assert!(storage.match_in("v1", &key("/x")).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_sqlite_put_and_match() {
    exercise_put_and_match(&SqliteStorage::open_in_memory().unwrap()).await;
  }

  #[tokio::test]
  async fn test_sqlite_keys_and_delete() {
    exercise_keys_and_delete(&SqliteStorage::open_in_memory().unwrap()).await;
  }

  #[tokio::test]
  async fn test_sqlite_put_all() {
    exercise_put_all(&SqliteStorage::open_in_memory().unwrap()).await;
  }

  #[tokio::test]
  async fn test_memory_put_and_match() {
    exercise_put_and_match(&MemoryStorage::new()).await;
  }

  #[tokio::test]
  async fn test_memory_keys_and_delete() {
    exercise_keys_and_delete(&MemoryStorage::new()).await;
  }

  #[tokio::test]
  async fn test_memory_put_all() {
    exercise_put_all(&MemoryStorage::new()).await;
  }

  #[tokio::test]
  async fn test_sqlite_persists_across_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(Some(&path)).unwrap();
      storage.put("v1", &key("/"), &html("home")).await.unwrap();
    }

    let storage = SqliteStorage::open(Some(&path)).unwrap();
    let hit = storage.match_in("v1", &key("/")).await.unwrap().unwrap();
    assert_eq!(hit.response.headers.get("content-type").unwrap(), "text/html");
    assert_eq!(hit.response.body, b"home");
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-03-01 12:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
