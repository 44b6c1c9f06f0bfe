//! Request and response snapshots exchanged between the worker, the network
//! fetcher and the cache store.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// Header map with lowercase names.
pub type Headers = BTreeMap<String, String>;

/// An outgoing request as seen by the fetch handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Headers,
}

impl Request {
  /// Build a GET request for `target`, which may be absolute or a path
  /// relative to `origin`.
  pub fn get(origin: &Url, target: &str) -> Result<Self> {
    Self::new("GET", origin, target)
  }

  pub fn new(method: &str, origin: &Url, target: &str) -> Result<Self> {
    let url = origin
      .join(target)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", target, e))?;

    Ok(Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Headers::new(),
    })
  }

  /// Set a header, normalizing its name.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  /// Whether the caller asked for an HTML document.
  ///
  /// A missing `accept` header counts as "not html".
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .is_some_and(|accept| accept.contains("text/html"))
  }

  /// Identity under which responses to this request are cached.
  ///
  /// Fragments never reach the server, so they are not part of the identity.
  pub fn key(&self) -> RequestKey {
    let mut url = self.url.clone();
    url.set_fragment(None);

    RequestKey {
      method: self.method.clone(),
      url: url.to_string(),
    }
  }
}

/// Cache identity of a request: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  /// SHA256 of "METHOD url", used as a fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Snapshot of a response: status line, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: status_text.into(),
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  #[cfg(test)]
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
