//! Table Fetcher - Generic List and Get handlers
//!
//! One List and one Get implementation serve every table in the registry.
//! List follows ARM `nextLink` pages, streams each item through the query's
//! row sink and stops as soon as the row budget is spent.

use super::hydrate::{self, run_hydrates};
use super::metrics::list_metric_statistics;
use super::registry::{get_table, ListConfig, ListKind};
use super::transform::{build_row, render_template, resource_group_segment};
use crate::azure::client::AzureClient;
use crate::azure::error::ApiError;
use crate::plugin::{Cancellation, QueryData};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Template variables available to list/get paths
type Vars = BTreeMap<String, String>;

/// Follows ARM `nextLink` pages
#[derive(Debug)]
pub struct Pager<'a> {
    next: Option<Url>,
    response_path: &'a str,
    pages: u32,
}

impl<'a> Pager<'a> {
    pub fn new(url: Url, response_path: &'a str) -> Self {
        Self {
            next: Some(url),
            response_path,
            pages: 0,
        }
    }

    /// Fetch the next page, or `None` when there are no more pages or the
    /// query was cancelled. Every page after the first waits on the list
    /// rate limiter.
    pub async fn next_page(
        &mut self,
        client: &AzureClient,
        d: &QueryData,
    ) -> Result<Option<Vec<Value>>, ApiError> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };

        if self.pages > 0 {
            d.wait_for_list_rate_limit().await;
        }
        if d.cancellation().is_cancelled() {
            return Ok(None);
        }

        let response = client.get(&url, d.cancellation()).await?;
        self.pages += 1;
        self.next = next_link(client, &response)?;

        let items = extract_items(&response, self.response_path);
        tracing::debug!(
            "Fetched page {} with {} items (more: {})",
            self.pages,
            items.len(),
            self.next.is_some()
        );
        Ok(Some(items))
    }
}

fn next_link(client: &AzureClient, response: &Value) -> Result<Option<Url>, ApiError> {
    response
        .get("nextLink")
        .and_then(Value::as_str)
        .filter(|link| !link.is_empty())
        .map(|link| client.next_link_url(link))
        .transpose()
}

/// Extract items from response using the response_path
fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    current.as_array().cloned().unwrap_or_default()
}

/// Collect every page of a collection. Used by hydrates, which are not
/// bound by the row budget.
pub async fn collect_all_pages(
    client: &AzureClient,
    url: Url,
    response_path: &str,
    cancel: &Cancellation,
) -> Result<Vec<Value>, ApiError> {
    let mut items = Vec::new();
    let mut next = Some(url);

    while let Some(url) = next.take() {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let response = client.get(&url, cancel).await?;
        items.extend(extract_items(&response, response_path));
        next = next_link(client, &response)?;
    }

    Ok(items)
}

fn base_vars(client: &AzureClient) -> Vars {
    let mut vars = Vars::new();
    vars.insert("subscription_id".to_string(), client.subscription_id.clone());
    vars
}

/// Variables a child table sees for one parent item
fn parent_vars(client: &AzureClient, parent: &Value) -> Vars {
    let mut vars = base_vars(client);
    let id = parent.get("id").and_then(Value::as_str).unwrap_or_default();

    if let Some(name) = parent.get("name").and_then(Value::as_str) {
        vars.insert("parent_name".to_string(), name.to_string());
    }
    if !id.is_empty() {
        vars.insert("parent_id".to_string(), id.to_string());
    }
    if let Some(rg) = resource_group_segment(id) {
        vars.insert("parent_resource_group".to_string(), rg.to_string());
    }
    vars
}

fn list_url(client: &AzureClient, list: &ListConfig, vars: &Vars) -> Result<Url, ApiError> {
    let path = list
        .path
        .as_deref()
        .ok_or_else(|| ApiError::Config("list has no path".to_string()))?;
    let api_version = list
        .api_version
        .as_deref()
        .ok_or_else(|| ApiError::Config("list has no api_version".to_string()))?;

    client.management_url(&render_template(path, vars)?, api_version)
}

fn has_id(item: &Value) -> bool {
    item.get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty())
}

/// Decorate, hydrate and stream one item
async fn emit(
    client: &AzureClient,
    d: &mut QueryData,
    mut item: Value,
    inject: &BTreeMap<String, String>,
    vars: &Vars,
) -> Result<(), ApiError> {
    if let Value::Object(map) = &mut item {
        for (field, template) in inject {
            map.insert(field.clone(), Value::String(render_template(template, vars)?));
        }
    }

    let hydrated = run_hydrates(client, d.needed_columns(), &item, d.cancellation()).await?;
    let row = build_row(d.needed_columns().iter().copied(), &item, &hydrated);
    d.stream_list_item(row).await;
    Ok(())
}

/// Stream every row of the query's table
pub async fn list_table(client: &AzureClient, d: &mut QueryData) -> Result<(), ApiError> {
    if d.rows_remaining() == 0 {
        return Ok(());
    }

    let table = d.table;
    tracing::debug!("list_table: {}", table.name);

    let result = match table.list.parent.as_deref() {
        None => list_items(client, d, &base_vars(client)).await,
        Some(parent) => list_with_parent(client, d, parent).await,
    };

    match result {
        Err(ApiError::Cancelled) => Ok(()),
        Err(err) if client.should_ignore(&err) => {
            tracing::debug!("list_table: {} ignored error: {}", table.name, err);
            Ok(())
        }
        other => other,
    }
}

async fn list_with_parent(
    client: &AzureClient,
    d: &mut QueryData,
    parent_name: &str,
) -> Result<(), ApiError> {
    let parent =
        get_table(parent_name).ok_or_else(|| ApiError::UnknownTable(parent_name.to_string()))?;

    let url = list_url(client, &parent.list, &base_vars(client))?;
    let mut pager = Pager::new(url, &parent.list.response_path);

    while let Some(parents) = pager.next_page(client, d).await? {
        for parent_item in parents {
            let vars = parent_vars(client, &parent_item);
            list_items(client, d, &vars).await?;
            if d.rows_remaining() == 0 {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// List the query's table within one scope (the subscription, or one parent)
async fn list_items(client: &AzureClient, d: &mut QueryData, vars: &Vars) -> Result<(), ApiError> {
    let table = d.table;
    let list = &table.list;

    match list.kind {
        ListKind::Paged => {
            let url = list_url(client, list, vars)?;
            let mut pager = Pager::new(url, &list.response_path);

            while let Some(items) = pager.next_page(client, d).await? {
                for item in items {
                    emit(client, d, item, &list.inject, vars).await?;
                    if d.rows_remaining() == 0 {
                        return Ok(());
                    }
                }
            }
        }
        ListKind::Single => {
            let url = list_url(client, list, vars)?;
            let item = client.get(&url, d.cancellation()).await?;
            if has_id(&item) {
                emit(client, d, item, &list.inject, vars).await?;
            }
        }
        ListKind::SubscriptionScope => {
            let item = hydrate::subscription_scope_item(client);
            emit(client, d, item, &list.inject, vars).await?;
        }
        ListKind::Metric => {
            let metric = list
                .metric
                .as_ref()
                .ok_or_else(|| ApiError::Config("metric list has no metric".to_string()))?;
            let resource_id = vars
                .get("parent_id")
                .ok_or_else(|| ApiError::MissingKey("parent_id".to_string()))?;

            let points = list_metric_statistics(client, resource_id, metric, d.cancellation()).await?;
            for point in points {
                emit(client, d, point, &list.inject, vars).await?;
                if d.rows_remaining() == 0 {
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Fetch the single row identified by the query's key column quals
pub async fn get_item(client: &AzureClient, d: &mut QueryData) -> Result<(), ApiError> {
    if d.rows_remaining() == 0 {
        return Ok(());
    }

    let table = d.table;
    let get = table
        .get
        .as_ref()
        .ok_or_else(|| ApiError::Config(format!("table {} has no get", table.name)))?;

    let mut vars = base_vars(client);
    for key in &get.key_columns {
        match d.equals_qual(key) {
            Some(value) if !value.is_empty() => {
                vars.insert(key.clone(), value.to_string());
            }
            _ => {
                tracing::debug!("get_item: {} has empty key {}", table.name, key);
                return Ok(());
            }
        }
    }

    let url = client.management_url(&render_template(&get.path, &vars)?, &get.api_version)?;
    let item = match client.get(&url, d.cancellation()).await {
        Ok(item) => item,
        Err(ApiError::Cancelled) => return Ok(()),
        Err(err) if err.matches_any(&get.ignore_codes) || client.should_ignore(&err) => {
            tracing::debug!("get_item: {} ignored error: {}", table.name, err);
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    if !has_id(&item) {
        return Ok(());
    }

    emit(client, d, item, &get.inject, &vars).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_items_by_path() {
        let response = json!({"value": [{"id": "a"}, {"id": "b"}], "nextLink": null});
        assert_eq!(extract_items(&response, "value").len(), 2);
        assert!(extract_items(&response, "items").is_empty());
        assert_eq!(extract_items(&json!([1, 2, 3]), "").len(), 3);
        assert!(extract_items(&json!({"value": {"id": "a"}}), "value").is_empty());
    }

    #[test]
    fn test_has_id() {
        assert!(has_id(&json!({"id": "/subscriptions/s"})));
        assert!(!has_id(&json!({"id": ""})));
        assert!(!has_id(&json!({"name": "x"})));
    }
}
