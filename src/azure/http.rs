//! HTTP utilities for Azure Resource Manager calls

use super::error::ApiError;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::Value;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Header ARM echoes back in its logs, handy when opening support tickets
const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for ARM calls
#[derive(Debug, Clone)]
pub struct AzureHttpClient {
    client: Client,
}

impl AzureHttpClient {
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("azinv/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// The underlying reqwest client, shared with the token providers
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Make a single GET request (no retries) and parse the JSON body
    pub async fn get(&self, url: &Url, token: &str) -> Result<Value, ApiError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("GET {} [{}]", url, request_id);

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .header(CLIENT_REQUEST_ID, &request_id)
            .send()
            .await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!(
                "API error: {} [{}] - {}",
                status,
                request_id,
                sanitize_for_log(&body)
            );
            return Err(ApiError::from_response(status.as_u16(), &body, retry_after));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

/// Format an API error for display on the terminal
pub fn format_azure_error(error: &ApiError) -> String {
    match error.status() {
        Some(401) => {
            return "Authentication failed. Run 'az login' or check your client credentials."
                .to_string()
        }
        Some(403) => {
            return "Permission denied. Check the role assignments of your identity.".to_string()
        }
        Some(429) => return "Rate limit exceeded. Please try again later.".to_string(),
        _ => {}
    }

    let message = error.to_string();
    let sanitized: String = message
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(160)
        .collect();

    if sanitized.len() < message.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
