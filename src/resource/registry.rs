//! Table Registry - Load table definitions from JSON
//!
//! This module loads all Azure table definitions from embedded JSON files
//! and provides lookup functions for the rest of the application.

use super::transform::Transform;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Embedded table JSON files (compiled into the binary)
const TABLE_FILES: &[&str] = &[
    include_str!("../resources/subscription.json"),
    include_str!("../resources/network.json"),
    include_str!("../resources/authorization.json"),
    include_str!("../resources/security.json"),
    include_str!("../resources/app_configuration.json"),
    include_str!("../resources/compute.json"),
];

/// Column type in the relational model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Bool,
    Int,
    Double,
    Json,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Double => "double",
            Self::Json => "json",
            Self::Timestamp => "timestamp",
        }
    }
}

/// Column definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub description: String,
    /// Dot path into the item (or into the hydrate result); defaults to the
    /// camelCase form of the column name
    #[serde(default)]
    pub from: Option<String>,
    /// Named hydrate supplying this column's value
    #[serde(default)]
    pub hydrate: Option<String>,
    #[serde(default)]
    pub constant: Option<Value>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
}

impl ColumnDef {
    fn standard(name: &str, column_type: ColumnType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            description: description.to_string(),
            from: None,
            hydrate: None,
            constant: None,
            transforms: Vec::new(),
        }
    }

    fn hydrated(mut self, hydrate: &str) -> Self {
        self.hydrate = Some(hydrate.to_string());
        self
    }

    fn from_field(mut self, path: &str, transforms: Vec<Transform>) -> Self {
        self.from = Some(path.to_string());
        self.transforms = transforms;
        self
    }
}

/// How a table's list operation produces items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    /// Follow `nextLink` pages of a collection
    #[default]
    Paged,
    /// One GET whose body is the single item
    Single,
    /// A synthetic item carrying only the subscription ID
    SubscriptionScope,
    /// Monitor metric data points for each parent resource
    Metric,
}

/// Metric time grain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Granularity {
    #[serde(rename = "5_MIN")]
    FiveMinutes,
    #[serde(rename = "HOURLY")]
    Hourly,
    #[serde(rename = "DAILY")]
    Daily,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricDef {
    pub namespace: String,
    pub metric: String,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConfig {
    #[serde(default)]
    pub kind: ListKind,
    /// Path template, e.g. `/subscriptions/{subscription_id}/providers/...`
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_response_path")]
    pub response_path: String,
    /// Table whose items scope this table's list calls
    #[serde(default)]
    pub parent: Option<String>,
    /// Fields added to every item, rendered from template variables
    #[serde(default)]
    pub inject: BTreeMap<String, String>,
    #[serde(default)]
    pub metric: Option<MetricDef>,
}

fn default_response_path() -> String {
    "value".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetConfig {
    pub key_columns: Vec<String>,
    pub path: String,
    pub api_version: String,
    /// Errors (ARM code or HTTP status) that mean "no row"
    #[serde(default)]
    pub ignore_codes: Vec<String>,
    #[serde(default)]
    pub inject: BTreeMap<String, String>,
}

/// Sets of columns appended to a table after loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardColumns {
    Azure,
    Metric,
}

/// Table definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct TableDef {
    #[serde(skip)]
    pub name: String,
    pub description: String,
    /// ARM resource provider, e.g. `Microsoft.Network`
    pub service: String,
    pub list: ListConfig,
    #[serde(default)]
    pub get: Option<GetConfig>,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub standard_columns: Vec<StandardColumns>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `quals` carry every key column of the Get config
    pub fn can_get(&self, quals: &BTreeMap<String, String>) -> bool {
        self.get
            .as_ref()
            .is_some_and(|get| get.key_columns.iter().all(|key| quals.contains_key(key)))
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub tables: HashMap<String, TableDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<TableConfig> = OnceLock::new();

fn azure_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::standard(
            "cloud_environment",
            ColumnType::String,
            "The Azure Cloud Environment.",
        )
        .hydrated("cloud_environment"),
        ColumnDef::standard(
            "subscription_id",
            ColumnType::String,
            "The Azure Subscription ID in which the resource is located.",
        )
        .hydrated("subscription_id"),
    ]
}

fn metric_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::standard("metric_name", ColumnType::String, "The name of the metric."),
        ColumnDef::standard("namespace", ColumnType::String, "The metric namespace."),
        ColumnDef::standard(
            "average",
            ColumnType::Double,
            "The average of the metric values that correspond to the data point.",
        ),
        ColumnDef::standard(
            "maximum",
            ColumnType::Double,
            "The maximum metric value for the data point.",
        ),
        ColumnDef::standard(
            "minimum",
            ColumnType::Double,
            "The minimum metric value for the data point.",
        ),
        ColumnDef::standard(
            "sample_count",
            ColumnType::Double,
            "The number of metric values that contributed to the aggregate value of this data point.",
        ),
        ColumnDef::standard(
            "sum",
            ColumnType::Double,
            "The sum of the metric values for the data point.",
        ),
        ColumnDef::standard(
            "timestamp",
            ColumnType::Timestamp,
            "The time stamp used for the data point.",
        ),
        ColumnDef::standard(
            "unit",
            ColumnType::String,
            "The units in which the metric value is reported.",
        ),
        ColumnDef::standard(
            "resource_group",
            ColumnType::String,
            "The resource group which holds this resource.",
        )
        .from_field("dimensionValue", vec![Transform::ResourceGroup]),
    ]
}

fn parse_tables(content: &str) -> Result<TableConfig, serde_json::Error> {
    let mut config: TableConfig = serde_json::from_str(content)?;

    for (name, table) in config.tables.iter_mut() {
        table.name = name.clone();
        for set in table.standard_columns.clone() {
            match set {
                StandardColumns::Azure => table.columns.extend(azure_columns()),
                StandardColumns::Metric => {
                    table.columns.extend(metric_columns());
                    table.columns.extend(azure_columns());
                }
            }
        }
    }

    Ok(config)
}

/// Get the table registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static TableConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = TableConfig {
            tables: HashMap::new(),
        };

        for content in TABLE_FILES {
            let partial = parse_tables(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded table JSON: {}", e));
            final_config.tables.extend(partial.tables);
        }

        final_config
    })
}

/// Get a table definition by name
pub fn get_table(name: &str) -> Option<&'static TableDef> {
    get_registry().tables.get(name)
}

/// All table names, sorted
pub fn get_all_table_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = get_registry()
        .tables
        .keys()
        .map(|s| s.as_str())
        .collect();
    names.sort_unstable();
    names
}
