//! Configuration Management
//!
//! Loads the bridge configuration from YAML (or JSON, by extension).
//! Command-line flags override whatever the file says.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::gce::auth;
use crate::engine::DEFAULT_MAX_REFERENCE_DEPTH;

const DEFAULT_BASE_URL: &str = "http://localhost:3001/cimi";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ZONE: &str = "us-central1-a";

/// Backend adapter to drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Mock,
    Gce,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GceConfig {
    pub project: Option<String>,
    pub zone: Option<String>,
    /// Alternative Compute Engine endpoint
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root every generated link hangs off
    pub base_url: String,
    pub driver: DriverKind,
    pub max_reference_depth: usize,
    /// 0 disables the deadline
    pub request_timeout_secs: u64,
    pub gce: GceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            driver: DriverKind::default(),
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            gce: GceConfig::default(),
        }
    }
}

impl Config {
    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cimi-bridge").join("config.yaml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file is not an error; a missing explicit one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        Self::parse(&content, is_json)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str, is_json: bool) -> Result<Self> {
        let config = if is_json {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base_url: {}", self.base_url))?;
        if self.max_reference_depth == 0 {
            anyhow::bail!("max_reference_depth must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Get effective project (config > gcloud default)
    pub fn effective_project(&self) -> Option<String> {
        self.gce.project.clone().or_else(auth::default_project)
    }

    /// Get effective zone (config > gcloud default)
    pub fn effective_zone(&self) -> String {
        self.gce
            .zone
            .clone()
            .or_else(auth::default_zone)
            .unwrap_or_else(|| DEFAULT_ZONE.to_string())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration")
    }
}
