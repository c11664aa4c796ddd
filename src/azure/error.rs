//! Azure API errors and their classification
//!
//! Every failure that can reach a table fetch is an [`ApiError`]. The
//! retry layer and the Get/List handlers only look at [`ApiError::class`]
//! and [`ApiError::matches_any`] to decide what happens next.

use serde::Deserialize;
use thiserror::Error;

/// ARM error codes that mean "this thing does not exist"
const NOT_FOUND_CODES: &[&str] = &["ResourceNotFound", "ResourceGroupNotFound", "NotFound"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Azure API returned error (HTTP {status}, {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        /// Seconds from a `Retry-After` header, if the service sent one
        retry_after: Option<u64>,
    },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Missing value for {0}")]
    MissingKey(String),

    #[error("Query cancelled")]
    Cancelled,
}

/// How the fetch layer should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff
    Transient,
    /// The resource (or its parent) does not exist
    NotFound,
    /// Propagate to the caller
    Fatal,
}

/// Error envelope returned by ARM: `{"error": {"code": "...", "message": "..."}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ApiError {
    /// Build an [`ApiError::Api`] from an HTTP status and the raw response body
    pub fn from_response(status: u16, body: &str, retry_after: Option<u64>) -> Self {
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => (envelope.error.code, envelope.error.message),
            Err(_) => (String::new(), String::new()),
        };

        let code = if code.is_empty() {
            status.to_string()
        } else {
            code
        };

        Self::Api {
            status,
            code,
            message,
            retry_after,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// ARM error code (`ResourceNotFound`, `AuthorizationFailed`, ...)
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify against the given set of transient HTTP statuses
    pub fn classify(&self, transient_statuses: &[u16]) -> ErrorClass {
        match self {
            Self::Api { status, code, .. } => {
                if *status == 404 || NOT_FOUND_CODES.contains(&code.as_str()) {
                    ErrorClass::NotFound
                } else if transient_statuses.contains(status) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            Self::Request(e) => {
                if e.is_timeout() || e.is_connect() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// True when the ARM code or the HTTP status (as text, e.g. `"404"`)
    /// equals one of `codes`
    pub fn matches_any<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        let code = self.code();
        let status = self.status().map(|s| s.to_string());

        codes.iter().any(|c| {
            let c = c.as_ref();
            code == Some(c) || status.as_deref() == Some(c)
        })
    }
}
