//! Named hydrates
//!
//! Maps hydrate names used by table definitions to the ARM calls that
//! produce their values. A hydrate runs once per row, only when a projected
//! column needs it.

use super::fetcher::collect_all_pages;
use super::registry::ColumnDef;
use crate::azure::client::AzureClient;
use crate::azure::error::ApiError;
use crate::plugin::Cancellation;
use futures::future::try_join_all;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};

const DIAGNOSTIC_SETTINGS_API_VERSION: &str = "2021-05-01-preview";
const SECURITY_API_VERSION: &str = "2017-08-01-preview";
const PRICINGS_API_VERSION: &str = "2018-06-01";
const POLICY_API_VERSION: &str = "2022-06-01";

/// Invoke a hydrate by name for one item
pub async fn invoke_hydrate(
    name: &str,
    client: &AzureClient,
    item: &Value,
    cancel: &Cancellation,
) -> Result<Value, ApiError> {
    tracing::debug!("invoke_hydrate: {}", name);

    match name {
        "cloud_environment" => Ok(json!(client.environment.name())),
        "subscription_id" => Ok(json!(client.subscription_id)),
        "diagnostic_settings" => list_diagnostic_settings(client, item, cancel).await,
        "security_center_auto_provisioning" => {
            let path = security_path(client, "autoProvisioningSettings");
            list_projected(client, &path, SECURITY_API_VERSION, &["id", "name", "properties", "type"], cancel)
                .await
        }
        "security_center_contacts" => {
            let path = security_path(client, "securityContacts");
            list_projected(client, &path, SECURITY_API_VERSION, &["id", "name", "properties", "type"], cancel)
                .await
        }
        "security_center_pricings" => {
            let path = security_path(client, "pricings");
            list_projected(client, &path, PRICINGS_API_VERSION, &["id", "name", "properties", "type"], cancel)
                .await
        }
        "security_center_settings" => {
            let path = security_path(client, "settings");
            list_projected(client, &path, SECURITY_API_VERSION, &["id", "name", "kind", "type"], cancel)
                .await
        }
        "security_center_policy" => {
            let path = format!(
                "{}/providers/Microsoft.Authorization/policyAssignments/SecurityCenterBuiltIn",
                client.subscription_scope()
            );
            let url = client.management_url(&path, POLICY_API_VERSION)?;
            client.get(&url, cancel).await
        }
        _ => Err(ApiError::Config(format!("Unknown hydrate: {}", name))),
    }
}

/// Run every hydrate the given columns need, concurrently.
///
/// Errors covered by the connection's ignore list leave that hydrate's
/// columns null instead of failing the row.
pub async fn run_hydrates(
    client: &AzureClient,
    columns: &[&ColumnDef],
    item: &Value,
    cancel: &Cancellation,
) -> Result<HashMap<String, Value>, ApiError> {
    let names: BTreeSet<&str> = columns
        .iter()
        .filter_map(|c| c.hydrate.as_deref())
        .collect();

    if names.is_empty() {
        return Ok(HashMap::new());
    }

    let calls = names.into_iter().map(|name| async move {
        let value = match invoke_hydrate(name, client, item, cancel).await {
            Ok(value) => value,
            Err(err) if client.should_ignore(&err) => {
                tracing::debug!("hydrate {} ignored error: {}", name, err);
                Value::Null
            }
            Err(err) => return Err(err),
        };
        Ok::<_, ApiError>((name.to_string(), value))
    });

    Ok(try_join_all(calls).await?.into_iter().collect())
}

/// Synthetic item for subscription-scoped tables
pub fn subscription_scope_item(client: &AzureClient) -> Value {
    json!({ "subscriptionId": client.subscription_id })
}

fn security_path(client: &AzureClient, collection: &str) -> String {
    format!(
        "{}/providers/Microsoft.Security/{}",
        client.subscription_scope(),
        collection
    )
}

/// List a collection and keep only `fields` of each item
async fn list_projected(
    client: &AzureClient,
    path: &str,
    api_version: &str,
    fields: &[&str],
    cancel: &Cancellation,
) -> Result<Value, ApiError> {
    let url = client.management_url(path, api_version)?;
    let items = collect_all_pages(client, url, "value", cancel).await?;
    Ok(Value::Array(
        items.iter().map(|item| project(item, fields)).collect(),
    ))
}

fn project(item: &Value, fields: &[&str]) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .filter_map(|f| {
            item.get(*f)
                .filter(|v| !v.is_null())
                .map(|v| (f.to_string(), v.clone()))
        })
        .collect();
    Value::Object(map)
}

async fn list_diagnostic_settings(
    client: &AzureClient,
    item: &Value,
    cancel: &Cancellation,
) -> Result<Value, ApiError> {
    let id = item
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::MissingKey("id".to_string()))?;

    let path = format!("{}/providers/Microsoft.Insights/diagnosticSettings", id);
    list_projected(
        client,
        &path,
        DIAGNOSTIC_SETTINGS_API_VERSION,
        &["id", "name", "type", "properties"],
        cancel,
    )
    .await
}
