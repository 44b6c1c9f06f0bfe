use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::worker::WorkerConfig;

pub const DEFAULT_ORIGIN: &str = "http://localhost:5000";
pub const DEFAULT_CACHE_NAME: &str = "cinelyon-v1";
pub const DEFAULT_STATIC_ASSETS: &[&str] = &[
  "/",
  "/static/css/main.css",
  "/static/images/nocontent.png",
  "/static/images/background.svg",
];
pub const DEFAULT_POSTER_HOSTS: &[&str] = &["allocine.fr", "wsrv.nl"];
pub const DEFAULT_OFFLINE_BODY: &str = "Contenu non disponible hors ligne";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the page the cache serves
  pub origin: String,
  /// Current cache generation; changing it drops older caches on activate
  pub cache_name: String,
  pub static_assets: Vec<String>,
  /// External URL substrings that are still intercepted (poster images)
  pub poster_hosts: Vec<String>,
  pub offline_body: String,
  /// Cache database path (defaults to the XDG data directory)
  pub database: Option<PathBuf>,
  /// Write logs to a daily file in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: DEFAULT_ORIGIN.to_string(),
      cache_name: DEFAULT_CACHE_NAME.to_string(),
      static_assets: DEFAULT_STATIC_ASSETS.iter().map(|s| s.to_string()).collect(),
      poster_hosts: DEFAULT_POSTER_HOSTS.iter().map(|s| s.to_string()).collect(),
      offline_body: DEFAULT_OFFLINE_BODY.to_string(),
      database: None,
      log_dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./cinelyon-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cinelyon-sw/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cinelyon-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cinelyon-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Immutable settings handed to the worker.
  pub fn worker(&self) -> Result<WorkerConfig> {
    let origin = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    Ok(WorkerConfig {
      origin,
      cache_name: self.cache_name.clone(),
      static_assets: self.static_assets.clone(),
      poster_hosts: self.poster_hosts.clone(),
      offline_body: self.offline_body.clone(),
    })
  }
}
