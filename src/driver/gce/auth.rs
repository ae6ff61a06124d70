//! GCE Authentication
//!
//! Bearer tokens come either from Application Default Credentials (cached
//! until shortly before expiry) or from a fixed token supplied by the
//! operator.

use anyhow::{Context, Result};
use gcp_auth::TokenProvider;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Scopes requested for Compute Engine access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/compute"];

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Assumed token lifetime when the provider does not say
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Where bearer tokens come from
#[derive(Clone)]
pub enum TokenSource {
    /// Operator-supplied token (e.g. `gcloud auth print-access-token`)
    Static(String),
    /// Application Default Credentials
    Adc(AdcCredentials),
}

/// ADC provider with token caching
#[derive(Clone)]
pub struct AdcCredentials {
    provider: Arc<dyn TokenProvider>,
    cache: Arc<RwLock<Option<CachedToken>>>,
}

impl TokenSource {
    pub async fn adc() -> Result<Self> {
        let provider = gcp_auth::provider().await.context(
            "Failed to initialize GCE authentication. Run 'gcloud auth application-default login'",
        )?;

        Ok(Self::Adc(AdcCredentials {
            provider,
            cache: Arc::new(RwLock::new(None)),
        }))
    }

    pub fn fixed(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    pub async fn token(&self) -> Result<String> {
        let AdcCredentials { provider, cache } = match self {
            Self::Static(token) => return Ok(token.clone()),
            Self::Adc(credentials) => credentials,
        };

        {
            let cached = cache.read().await;
            if let Some(cached) = cached.as_ref().filter(|c| c.is_valid()) {
                return Ok(cached.token.clone());
            }
        }

        let token = provider
            .token(DEFAULT_SCOPES)
            .await
            .context("Failed to get access token")?;
        let token = token.as_str().to_string();

        *cache.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER,
        });
        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            (DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token)
    }
}

/// gcloud configuration directory
pub fn gcloud_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|p| p.join("gcloud"))
}

/// Project IDs are 6-30 characters of lowercase letters, digits and
/// hyphens, start with a letter and do not end with a hyphen
pub fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 {
        return false;
    }
    if !project.starts_with(|c: char| c.is_ascii_lowercase()) || project.ends_with('-') {
        return false;
    }
    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// `key` from `[section]` of the active gcloud configuration
fn active_config_value(section: &str, key: &str) -> Option<String> {
    let config_dir = gcloud_config_dir()?;
    let active = std::fs::read_to_string(config_dir.join("active_config")).ok()?;
    let name = active.trim();

    // config names end up in a path
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        tracing::warn!("Invalid characters in active_config name");
        return None;
    }

    let content = std::fs::read_to_string(
        config_dir
            .join("configurations")
            .join(format!("config_{}", name)),
    )
    .ok()?;
    ini_value(&content, section, key)
}

fn ini_value(content: &str, section: &str, key: &str) -> Option<String> {
    let header = format!("[{}]", section);
    let mut in_section = false;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_section = line == header;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            if k.trim() == key {
                return Some(v.trim().to_string());
            }
        }
    }
    None
}

/// Default project from the environment or gcloud configuration
pub fn default_project() -> Option<String> {
    for var in ["CLOUDSDK_CORE_PROJECT", "GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"] {
        if let Ok(project) = std::env::var(var) {
            if validate_project_id(&project) {
                return Some(project);
            }
            tracing::warn!("Invalid project ID format in {}", var);
        }
    }

    active_config_value("core", "project").filter(|p| validate_project_id(p))
}

/// Default zone from the environment or gcloud configuration
pub fn default_zone() -> Option<String> {
    if let Ok(zone) = std::env::var("CLOUDSDK_COMPUTE_ZONE") {
        return Some(zone);
    }
    active_config_value("compute", "zone")
}
