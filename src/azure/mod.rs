//! Azure Resource Manager interaction module
//!
//! Core functionality for talking to ARM: authentication, the HTTP client,
//! error classification and retry rules.
//!
//! # Module Structure
//!
//! - [`auth`] - credentials (static token, client secret, Azure CLI) and cloud environments
//! - [`client`] - per-connection session used by every table query
//! - [`error`] - [`ApiError`](error::ApiError) and its transient/not-found/fatal classes
//! - [`http`] - single-shot REST calls
//! - [`retry`] - bounded exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use azinv::azure::client::AzureClient;
//! use azinv::config::Config;
//! use azinv::plugin::Cancellation;
//!
//! async fn example(config: &Config) -> Result<(), azinv::azure::error::ApiError> {
//!     let client = AzureClient::new(config).await?;
//!     let url = client.management_url(&client.subscription_scope(), "2022-12-01")?;
//!     let subscription = client.get(&url, &Cancellation::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod retry;
