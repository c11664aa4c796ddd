//! Per-query context handed to table handlers
//!
//! Holds the row sink, the row budget, the qualifiers and the projection
//! for one query. List handlers only talk to the host through this type.

use super::{Cancellation, RateLimiter, Row};
use crate::resource::{ColumnDef, TableDef};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct QueryData {
    pub table: &'static TableDef,
    quals: BTreeMap<String, String>,
    columns: Vec<&'static ColumnDef>,
    projection: Option<Vec<String>>,
    limit: Option<u64>,
    streamed: u64,
    sink: mpsc::Sender<Row>,
    cancel: Cancellation,
    rate_limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for QueryData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryData")
            .field("table", &self.table.name)
            .field("quals", &self.quals)
            .field("limit", &self.limit)
            .field("streamed", &self.streamed)
            .finish()
    }
}

impl QueryData {
    /// `projection` of `None` means every column
    pub fn new(
        table: &'static TableDef,
        quals: BTreeMap<String, String>,
        projection: Option<Vec<String>>,
        limit: Option<u64>,
        sink: mpsc::Sender<Row>,
        cancel: Cancellation,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        // Qual columns are computed even when not projected so rows can be filtered
        let columns = table
            .columns
            .iter()
            .filter(|c| {
                projection
                    .as_ref()
                    .map_or(true, |p| p.contains(&c.name) || quals.contains_key(&c.name))
            })
            .collect();

        Self {
            table,
            quals,
            columns,
            projection,
            limit,
            streamed: 0,
            sink,
            cancel,
            rate_limiter,
        }
    }

    /// Value of an equality qual on `column`
    pub fn equals_qual(&self, column: &str) -> Option<&str> {
        self.quals.get(column).map(String::as_str)
    }

    /// Columns handlers must compute for each row
    pub fn needed_columns(&self) -> &[&'static ColumnDef] {
        &self.columns
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    pub fn rows_streamed(&self) -> u64 {
        self.streamed
    }

    /// How many more rows the caller wants. Zero once the query is cancelled
    /// or the limit is reached; `u64::MAX` when there is no limit.
    pub fn rows_remaining(&self) -> u64 {
        if self.cancel.is_cancelled() {
            return 0;
        }
        match self.limit {
            Some(limit) => limit.saturating_sub(self.streamed),
            None => u64::MAX,
        }
    }

    /// Block until the list rate limiter grants a token or the query is cancelled
    pub async fn wait_for_list_rate_limit(&self) {
        if !self.rate_limiter.is_enabled() {
            return;
        }
        tokio::select! {
            _ = self.rate_limiter.acquire() => {}
            _ = self.cancel.cancelled() => {
                tracing::debug!("wait_for_list_rate_limit: cancelled");
            }
        }
    }

    fn matches_quals(&self, row: &Row) -> bool {
        self.quals.iter().all(|(column, expected)| match row.get(column) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == *expected,
        })
    }

    /// Send a row to the sink. Rows that fail the quals are dropped without
    /// consuming budget; a closed sink cancels the query.
    pub async fn stream_list_item(&mut self, mut row: Row) {
        if self.rows_remaining() == 0 {
            return;
        }
        if !self.matches_quals(&row) {
            tracing::trace!("stream_list_item: row filtered by quals");
            return;
        }

        if let Some(projection) = &self.projection {
            row.retain(|name, _| projection.contains(name));
        }

        if self.sink.send(row).await.is_err() {
            tracing::debug!("stream_list_item: sink closed, cancelling query");
            self.cancel.cancel();
            return;
        }
        self.streamed += 1;
    }
}
