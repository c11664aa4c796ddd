//! Configuration Management
//!
//! Connection settings for azinv: where to authenticate, which subscription
//! to query, and how hard to retry and throttle.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Token bucket settings for the list rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second
    pub fill_rate: f64,
    /// Maximum burst
    pub bucket_size: u32,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Pre-acquired bearer token; skips all other credential sources
    #[serde(default)]
    pub access_token: Option<String>,
    /// `AzurePublicCloud`, `AzureUSGovernmentCloud` or `AzureChinaCloud`
    #[serde(default)]
    pub environment: Option<String>,
    /// Override for the resource manager base URL
    #[serde(default)]
    pub resource_manager_endpoint: Option<String>,
    /// Override for the Azure AD authority host
    #[serde(default)]
    pub authority_host: Option<String>,
    #[serde(default)]
    pub max_error_retry_attempts: Option<u32>,
    /// Milliseconds
    #[serde(default)]
    pub min_error_retry_delay: Option<u64>,
    /// Error codes (ARM code or HTTP status) that end a query with no rows
    #[serde(default)]
    pub ignore_error_codes: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Config {
    /// Default config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("azinv").join("config.yaml"))
    }

    /// Load configuration from `path`, or the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Overlay values from `AZURE_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }

    fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut Option<String>); 6] = [
            ("AZURE_SUBSCRIPTION_ID", &mut self.subscription_id),
            ("AZURE_TENANT_ID", &mut self.tenant_id),
            ("AZURE_CLIENT_ID", &mut self.client_id),
            ("AZURE_CLIENT_SECRET", &mut self.client_secret),
            ("AZURE_ENVIRONMENT", &mut self.environment),
            ("AZURE_ACCESS_TOKEN", &mut self.access_token),
        ];

        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                *field = Some(value);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(self.max_error_retry_attempts, Some(n) if n < 1) {
            bail!("max_error_retry_attempts must be greater than or equal to 1");
        }
        if matches!(self.min_error_retry_delay, Some(n) if n < 1) {
            bail!("min_error_retry_delay must be greater than or equal to 1");
        }
        if let Some(limit) = &self.rate_limit {
            if !(limit.fill_rate > 0.0) {
                bail!("rate_limit.fill_rate must be greater than 0");
            }
            if limit.bucket_size < 1 {
                bail!("rate_limit.bucket_size must be greater than or equal to 1");
            }
        }

        let client_fields = [&self.client_id, &self.client_secret];
        if client_fields.iter().any(|f| f.is_some())
            && (client_fields.iter().any(|f| f.is_none()) || self.tenant_id.is_none())
        {
            bail!("client secret authentication needs tenant_id, client_id and client_secret");
        }

        Ok(())
    }
}
