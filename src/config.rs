use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Cache store name of the deployed version
pub const DEFAULT_CACHE_NAME: &str = "simple-word-counter-pwa";

/// Assets pre-cached on install, relative to the origin
pub const DEFAULT_ASSETS: &[&str] = &[
  "./",
  "./index.html",
  "./pkg/bundle.js",
  "./pkg/yew_wasm_pack_minimal_bg.wasm",
];

const DEFAULT_ORIGIN: &str = "http://localhost:8080/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// What gets cached and under which name. Fixed for a deployed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheManifest {
  pub cache_name: String,
  pub assets: Vec<String>,
}

impl Default for PrecacheManifest {
  fn default() -> Self {
    Self {
      cache_name: DEFAULT_CACHE_NAME.to_string(),
      assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL the asset identifiers resolve against
  pub origin: Url,
  pub cache_name: String,
  pub assets: Vec<String>,
  /// HTTP client timeout for every network fetch
  pub timeout_secs: u64,
  /// Cache database path (defaults to the platform data directory)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    let manifest = PrecacheManifest::default();
    Self {
      origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
      cache_name: manifest.cache_name,
      assets: manifest.assets,
      timeout_secs: DEFAULT_TIMEOUT_SECS,
      database: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./precache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/precache/config.yaml
  ///
  /// Without any file the built-in deployment defaults apply.
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
    let local = PathBuf::from("precache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("precache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if config.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }

    Ok(config)
  }

  /// The manifest handed to the offline cache handler.
  pub fn manifest(&self) -> PrecacheManifest {
    PrecacheManifest {
      cache_name: self.cache_name.clone(),
      assets: self.assets.clone(),
    }
  }

  /// Database path: the configured one, or the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("precache").join("cache.db"))
  }
}
