//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `GENARC_ROOT` environment variable
//! 3. `root_folder` key in the TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing config file is not an error: defaults are used and a warning is logged.
//! A config file that exists but cannot be parsed is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable consulted for the root folder
pub const ROOT_ENV_VAR: &str = "GENARC_ROOT";

/// Ingestion settings loaded from `config.toml`
///
/// Relative directories are resolved against the root folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Root folder override (priority 3, below CLI and environment)
    pub root_folder: Option<PathBuf>,
    /// Download staging directory
    pub staging_dir: PathBuf,
    /// Final destination for tagged images
    pub dest_dir: PathBuf,
    /// Destination for JSON sidecars and captured reference images
    pub meta_dir: PathBuf,
    /// Model-info caches and download ledgers
    pub cache_dir: PathBuf,
    /// Transcode downloads to WebP unless already an efficient format
    pub compressed: bool,
    /// Skip non-upscale artifacts and reference-image capture
    pub upscales_only: bool,
    /// Maximum number of ingestion jobs run at once
    pub queue_concurrency: usize,
    /// Per-request HTTP timeout
    pub http_timeout_secs: u64,
    /// Path or command name of the exiftool executable
    pub exiftool_path: PathBuf,
    /// Queue event broadcast capacity
    pub event_capacity: usize,
    /// Extra request headers per provider (`[provider_headers.Dezgo]`)
    pub provider_headers: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            staging_dir: PathBuf::from("temp"),
            dest_dir: PathBuf::from("tagged"),
            meta_dir: PathBuf::from("tagged"),
            cache_dir: PathBuf::from("cache"),
            compressed: false,
            upscales_only: false,
            queue_concurrency: 1,
            http_timeout_secs: 120,
            exiftool_path: PathBuf::from("exiftool"),
            event_capacity: 100,
            provider_headers: BTreeMap::new(),
        }
    }
}

impl IngestConfig {
    /// Parse a config file. Fails on unreadable or malformed TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IngestConfig = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Load the config file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };
        match path {
            Some(p) if p.exists() => Self::load(&p),
            Some(p) => {
                warn!(path = %p.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_concurrency == 0 {
            return Err(Error::Config("queue_concurrency must be at least 1".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::Config("http_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Headers configured for one provider (empty when none)
    pub fn headers_for(&self, provider: &str) -> BTreeMap<String, String> {
        self.provider_headers.get(provider).cloned().unwrap_or_default()
    }

    /// Resolve a configured directory against the root folder
    pub fn resolve_dir(&self, root: &Path, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            root.join(dir)
        }
    }
}

/// Resolve the root folder following the priority order in the module docs
pub fn resolve_root_folder(cli_arg: Option<&str>, config: &IngestConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Default configuration file path for the platform (`<config dir>/genarc/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("genarc").join("config.toml"))
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("genarc"))
        .unwrap_or_else(|| PathBuf::from("./genarc_data"))
}
