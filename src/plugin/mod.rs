//! Query host adapter
//!
//! [`Plugin`] is the entry point a host uses to run a table query: it picks
//! Get or List for the request, wires the row sink, budget, cancellation and
//! shared rate limiter into a [`QueryData`], and runs the table handler.
//!
//! # Example
//!
//! ```ignore
//! let plugin = Plugin::new(client, config.rate_limit);
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! let request = QueryRequest::new("azure_network_watcher").with_limit(10);
//! tokio::spawn(async move { plugin.execute(request, tx, Cancellation::new()).await });
//! while let Some(row) = rx.recv().await {
//!     println!("{}", row["name"]);
//! }
//! ```

mod cancel;
mod query;
mod rate_limit;

pub use cancel::Cancellation;
pub use query::QueryData;
pub use rate_limit::RateLimiter;

use crate::azure::client::AzureClient;
use crate::azure::error::ApiError;
use crate::config::RateLimitConfig;
use crate::resource::{fetcher, get_table};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One result row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A table query as issued by the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    pub table: String,
    /// Equality qualifiers, `column = value`
    pub quals: BTreeMap<String, String>,
    /// Projected columns; `None` selects every column
    pub columns: Option<Vec<String>>,
    pub limit: Option<u64>,
}

impl QueryRequest {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn with_qual(mut self, column: &str, value: &str) -> Self {
        self.quals.insert(column.to_string(), value.to_string());
        self
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Runs table queries against one connection
#[derive(Debug, Clone)]
pub struct Plugin {
    client: AzureClient,
    rate_limiter: Arc<RateLimiter>,
}

impl Plugin {
    pub fn new(client: AzureClient, rate_limit: Option<RateLimitConfig>) -> Self {
        Self {
            client,
            rate_limiter: Arc::new(RateLimiter::from_config(rate_limit)),
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Run `request`, streaming rows to `sink`. Returns the number of rows sent.
    pub async fn execute(
        &self,
        request: QueryRequest,
        sink: mpsc::Sender<Row>,
        cancel: Cancellation,
    ) -> Result<u64, ApiError> {
        let table =
            get_table(&request.table).ok_or_else(|| ApiError::UnknownTable(request.table.clone()))?;

        let referenced = request
            .quals
            .keys()
            .chain(request.columns.iter().flatten());
        for column in referenced {
            if table.column(column).is_none() {
                return Err(ApiError::UnknownColumn(format!("{}.{}", table.name, column)));
            }
        }

        let use_get = table.can_get(&request.quals);
        tracing::info!(
            "execute: table={}, mode={}, quals={:?}, limit={:?}",
            table.name,
            if use_get { "get" } else { "list" },
            request.quals,
            request.limit
        );

        let mut d = QueryData::new(
            table,
            request.quals,
            request.columns,
            request.limit,
            sink,
            cancel,
            self.rate_limiter.clone(),
        );

        if use_get {
            fetcher::get_item(&self.client, &mut d).await?;
        } else {
            fetcher::list_table(&self.client, &mut d).await?;
        }

        tracing::info!("execute: table={} streamed {} rows", table.name, d.rows_streamed());
        Ok(d.rows_streamed())
    }
}
