//! Azure Authentication
//!
//! Handles authentication with a static bearer token, a service principal
//! client secret, or the Azure CLI's cached login.

use super::error::ApiError;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Longest a token is cached, whatever the token endpoint reports
const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Azure cloud the connection talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloudEnvironment {
    #[default]
    Public,
    UsGovernment,
    China,
}

impl CloudEnvironment {
    /// Name as reported in the `cloud_environment` column
    pub fn name(&self) -> &'static str {
        match self {
            Self::Public => "AzurePublicCloud",
            Self::UsGovernment => "AzureUSGovernmentCloud",
            Self::China => "AzureChinaCloud",
        }
    }

    pub fn resource_manager_endpoint(&self) -> &'static str {
        match self {
            Self::Public => "https://management.azure.com",
            Self::UsGovernment => "https://management.usgovcloudapi.net",
            Self::China => "https://management.chinacloudapi.cn",
        }
    }

    pub fn active_directory_endpoint(&self) -> &'static str {
        match self {
            Self::Public => "https://login.microsoftonline.com",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
        }
    }
}

impl FromStr for CloudEnvironment {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azurepubliccloud" | "public" | "azurecloud" => Ok(Self::Public),
            "azureusgovernmentcloud" | "usgovernment" | "azureusgovernment" => {
                Ok(Self::UsGovernment)
            }
            "azurechinacloud" | "china" => Ok(Self::China),
            other => Err(ApiError::Config(format!(
                "unknown cloud environment '{}'",
                other
            ))),
        }
    }
}

enum CredentialSource {
    Static(String),
    ClientSecret {
        http: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: String,
    },
    AzureCli {
        resource: String,
    },
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    source: Arc<CredentialSource>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl std::fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("source", &self.source_name())
            .finish()
    }
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn new(token: String, ttl: Duration) -> Self {
        let now = Instant::now();
        let lifetime = ttl.min(MAX_TOKEN_TTL).saturating_sub(TOKEN_EXPIRY_BUFFER);
        Self {
            token,
            expires_at: now
                .checked_add(lifetime)
                .unwrap_or_else(|| now + DEFAULT_TOKEN_TTL.saturating_sub(TOKEN_EXPIRY_BUFFER)),
        }
    }

    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Deserialize)]
struct ClientSecretTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

#[derive(Deserialize)]
struct CliAccount {
    id: String,
}

impl AzureCredentials {
    fn with_source(source: CredentialSource) -> Self {
        Self {
            source: Arc::new(source),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Use a pre-acquired bearer token as-is
    pub fn static_token(token: &str) -> Self {
        Self::with_source(CredentialSource::Static(token.to_string()))
    }

    /// Service principal with a client secret (OAuth2 client credentials)
    pub fn client_secret(
        http: reqwest::Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
        environment: CloudEnvironment,
    ) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority_host.trim_end_matches('/'),
            tenant_id
        );

        Self::with_source(CredentialSource::ClientSecret {
            http,
            token_url,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: format!("{}/.default", environment.resource_manager_endpoint()),
        })
    }

    /// Reuse the login of the Azure CLI (`az login`)
    pub fn azure_cli(environment: CloudEnvironment) -> Self {
        Self::with_source(CredentialSource::AzureCli {
            resource: format!("{}/", environment.resource_manager_endpoint()),
        })
    }

    pub fn source_name(&self) -> &'static str {
        match self.source.as_ref() {
            CredentialSource::Static(_) => "static-token",
            CredentialSource::ClientSecret { .. } => "client-secret",
            CredentialSource::AzureCli { .. } => "azure-cli",
        }
    }

    /// Get an access token for API calls
    /// Checks token expiry before returning cached token
    pub async fn get_token(&self) -> Result<String, ApiError> {
        if let CredentialSource::Static(token) = self.source.as_ref() {
            return Ok(token.clone());
        }

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let (token, ttl) = self.fetch_token().await?;

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken::new(token.clone(), ttl));
        }

        tracing::debug!(
            "New {} token cached, expires in ~{} minutes",
            self.source_name(),
            ttl.min(MAX_TOKEN_TTL).saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token)
    }

    /// False for a static token, which cannot be refreshed
    pub fn is_refreshable(&self) -> bool {
        !matches!(self.source.as_ref(), CredentialSource::Static(_))
    }

    /// Drop the cached token and fetch a new one
    pub async fn refresh_token(&self) -> Result<String, ApiError> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }

        self.get_token().await
    }

    async fn fetch_token(&self) -> Result<(String, Duration), ApiError> {
        match self.source.as_ref() {
            CredentialSource::Static(token) => Ok((token.clone(), DEFAULT_TOKEN_TTL)),
            CredentialSource::ClientSecret {
                http,
                token_url,
                client_id,
                client_secret,
                scope,
            } => {
                let response = http
                    .post(token_url)
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("scope", scope.as_str()),
                    ])
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    return Err(ApiError::Auth(format!(
                        "token endpoint returned {}",
                        status
                    )));
                }

                let body: ClientSecretTokenResponse = response
                    .json()
                    .await
                    .map_err(|e| ApiError::Auth(format!("invalid token response: {}", e)))?;
                let ttl = body
                    .expires_in
                    .map(|secs| Duration::from_secs(secs).min(MAX_TOKEN_TTL))
                    .unwrap_or(DEFAULT_TOKEN_TTL);

                Ok((body.access_token, ttl))
            }
            CredentialSource::AzureCli { resource } => {
                let output = run_azure_cli(&[
                    "account",
                    "get-access-token",
                    "--resource",
                    resource,
                    "--output",
                    "json",
                ])
                .await?;

                let body: CliTokenResponse = serde_json::from_slice(&output)
                    .map_err(|e| ApiError::Auth(format!("invalid az output: {}", e)))?;
                let ttl = body
                    .expires_on
                    .and_then(|at| at.checked_sub(chrono::Utc::now().timestamp()))
                    .and_then(|secs| u64::try_from(secs).ok())
                    .map(|secs| Duration::from_secs(secs).min(MAX_TOKEN_TTL))
                    .unwrap_or(DEFAULT_TOKEN_TTL);

                Ok((body.access_token, ttl))
            }
        }
    }
}

async fn run_azure_cli(args: &[&str]) -> Result<Vec<u8>, ApiError> {
    let output = tokio::process::Command::new("az")
        .args(args)
        .output()
        .await
        .map_err(|e| {
            ApiError::Auth(format!(
                "failed to run Azure CLI ({}). Run 'az login' or configure a client secret",
                e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ApiError::Auth(format!(
            "Azure CLI failed: {}",
            stderr.lines().next().unwrap_or("unknown error")
        )));
    }

    Ok(output.stdout)
}

/// Subscription selected by `az account set`, if the CLI is logged in
pub async fn azure_cli_default_subscription() -> Option<String> {
    let output = run_azure_cli(&["account", "show", "--output", "json"])
        .await
        .ok()?;
    let account: CliAccount = serde_json::from_slice(&output).ok()?;
    Some(account.id)
}
