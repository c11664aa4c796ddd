//! Azure Client
//!
//! Per-connection session: credentials, HTTP, retry rules and the
//! subscription scope every table query runs against.

use super::auth::{azure_cli_default_subscription, AzureCredentials, CloudEnvironment};
use super::error::ApiError;
use super::http::AzureHttpClient;
use super::retry::{apply_retry_rules, RetryPolicy};
use crate::config::Config;
use crate::plugin::Cancellation;
use serde_json::Value;
use url::Url;

/// Main Azure client
#[derive(Debug, Clone)]
pub struct AzureClient {
    pub credentials: AzureCredentials,
    pub http: AzureHttpClient,
    pub retry: RetryPolicy,
    pub subscription_id: String,
    pub environment: CloudEnvironment,
    pub ignore_error_codes: Vec<String>,
    endpoint: Url,
}

impl AzureClient {
    /// Create a session from connection configuration
    pub async fn new(config: &Config) -> Result<Self, ApiError> {
        let environment = match config.environment.as_deref() {
            Some(name) => name.parse()?,
            None => CloudEnvironment::default(),
        };

        let http = AzureHttpClient::new()?;

        let credentials = if let Some(token) = config.access_token.as_deref() {
            AzureCredentials::static_token(token)
        } else if let (Some(tenant), Some(client_id), Some(secret)) = (
            config.tenant_id.as_deref(),
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
        ) {
            let authority = config
                .authority_host
                .as_deref()
                .unwrap_or(environment.active_directory_endpoint());
            AzureCredentials::client_secret(
                http.inner().clone(),
                authority,
                tenant,
                client_id,
                secret,
                environment,
            )
        } else {
            AzureCredentials::azure_cli(environment)
        };

        let subscription_id = match config.subscription_id.clone() {
            Some(id) => id,
            None => azure_cli_default_subscription().await.ok_or_else(|| {
                ApiError::Config(
                    "no subscription configured. Set AZURE_SUBSCRIPTION_ID or use --subscription"
                        .to_string(),
                )
            })?,
        };

        let endpoint = config
            .resource_manager_endpoint
            .as_deref()
            .unwrap_or(environment.resource_manager_endpoint());
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ApiError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))?;

        tracing::info!(
            "Session ready: subscription={}, environment={}, credentials={}",
            subscription_id,
            environment.name(),
            credentials.source_name()
        );

        Ok(Self {
            credentials,
            http,
            retry: apply_retry_rules(config),
            subscription_id,
            environment,
            ignore_error_codes: config.ignore_error_codes.clone(),
            endpoint,
        })
    }

    pub async fn get_token(&self) -> Result<String, ApiError> {
        self.credentials.get_token().await
    }

    /// GET with the connection's retry rules applied. A 401 on a cached
    /// token refreshes the token once and repeats the call.
    pub async fn get(&self, url: &Url, cancel: &Cancellation) -> Result<Value, ApiError> {
        let token = self.get_token().await?;
        let operation = format!("GET {}", url.path());

        let result = self
            .retry
            .execute(&operation, cancel, || self.http.get(url, &token))
            .await;

        match result {
            Err(err) if err.status() == Some(401) && self.credentials.is_refreshable() => {
                tracing::debug!("{}: token rejected, refreshing: {}", operation, err);
                let token = self.credentials.refresh_token().await?;
                self.retry
                    .execute(&operation, cancel, || self.http.get(url, &token))
                    .await
            }
            other => other,
        }
    }

    /// True when the connection-wide ignore list covers `err`
    pub fn should_ignore(&self, err: &ApiError) -> bool {
        err.matches_any(&self.ignore_error_codes)
    }

    // =========================================================================
    // Resource Manager URL helpers
    // =========================================================================

    /// Build a management URL for `path` (which starts with `/`)
    pub fn management_url(&self, path: &str, api_version: &str) -> Result<Url, ApiError> {
        let mut url = self
            .endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Config(format!("invalid path '{}': {}", path, e)))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// Build a management URL with extra query parameters
    pub fn management_url_with_query(
        &self,
        path: &str,
        api_version: &str,
        query: &[(&str, &str)],
    ) -> Result<Url, ApiError> {
        let mut url = self.management_url(path, api_version)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Resolve an ARM `nextLink`, which is normally absolute
    pub fn next_link_url(&self, next_link: &str) -> Result<Url, ApiError> {
        self.endpoint
            .join(next_link)
            .map_err(|e| ApiError::Parse(format!("invalid nextLink '{}': {}", next_link, e)))
    }

    /// `/subscriptions/{id}` scope path
    pub fn subscription_scope(&self) -> String {
        format!("/subscriptions/{}", self.subscription_id)
    }
}
