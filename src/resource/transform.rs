//! Column transforms
//!
//! Pure functions that turn raw ARM JSON into column values: path lookup,
//! named transforms, and coercion to the column type.

use super::registry::{ColumnDef, ColumnType};
use crate::azure::error::ApiError;
use crate::plugin::Row;
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Named transform applied to a column value after lookup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Transform {
    ToLower,
    ToString,
    /// `["azure://<id>", "azure://<lower id>"]`
    IdToAkas,
    /// Resource group segment of an ID, lower-cased
    ResourceGroup,
    LastPathElement,
    /// `/`-separated segment N of an ID
    IdSegment(usize),
    Timestamp,
    PrivateEndpointConnections,
    SecurityCenterAkas,
    /// Falls back to Enabled/Disabled from private endpoint connections
    PublicNetworkAccess,
}

impl TryFrom<String> for Transform {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if let Some(index) = value.strip_prefix("id_segment:") {
            return index
                .parse()
                .map(Transform::IdSegment)
                .map_err(|_| format!("invalid segment index in '{}'", value));
        }

        match value.as_str() {
            "to_lower" => Ok(Self::ToLower),
            "to_string" => Ok(Self::ToString),
            "id_to_akas" => Ok(Self::IdToAkas),
            "resource_group" => Ok(Self::ResourceGroup),
            "last_path_element" => Ok(Self::LastPathElement),
            "timestamp" => Ok(Self::Timestamp),
            "private_endpoint_connections" => Ok(Self::PrivateEndpointConnections),
            "security_center_akas" => Ok(Self::SecurityCenterAkas),
            "public_network_access" => Ok(Self::PublicNetworkAccess),
            other => Err(format!("unknown transform '{}'", other)),
        }
    }
}

impl Transform {
    /// Apply to `value`; `item` is the whole API object for transforms that
    /// need sibling fields
    pub fn apply(&self, value: Value, item: &Value) -> Value {
        match self {
            Self::ToLower => map_str(value, |s| s.to_lowercase()),
            Self::ToString => match value {
                Value::Null | Value::String(_) => value,
                other => Value::String(other.to_string()),
            },
            Self::IdToAkas => match value.as_str() {
                Some(id) => id_to_akas(id),
                None => Value::Null,
            },
            Self::ResourceGroup => match value.as_str().and_then(resource_group_from_id) {
                Some(rg) => Value::String(rg),
                None => Value::Null,
            },
            Self::LastPathElement => map_str(value, |s| {
                s.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            }),
            Self::IdSegment(index) => match value.as_str().and_then(|s| s.split('/').nth(*index)) {
                Some(segment) if !segment.is_empty() => Value::String(segment.to_string()),
                _ => Value::Null,
            },
            Self::Timestamp => normalize_timestamp(value),
            Self::PrivateEndpointConnections => flatten_private_endpoint_connections(&value),
            Self::SecurityCenterAkas => match value.as_str() {
                Some(subscription) => id_to_akas(&format!(
                    "/subscriptions/{}/providers/Microsoft.Security/securityCenter",
                    subscription
                )),
                None => Value::Null,
            },
            Self::PublicNetworkAccess => match value {
                Value::String(s) if !s.is_empty() => Value::String(s),
                _ => {
                    let connections = lookup(item, "properties.privateEndpointConnections");
                    let has_connections = connections.is_some_and(Value::is_array);
                    let state = if has_connections { "Disabled" } else { "Enabled" };
                    Value::String(state.to_string())
                }
            },
        }
    }
}

fn map_str<F: Fn(&str) -> String>(value: Value, f: F) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn id_to_akas(id: &str) -> Value {
    json!([format!("azure://{}", id), format!("azure://{}", id.to_lowercase())])
}

/// Segment after `resourceGroups` in a resource ID, as written
pub fn resource_group_segment(id: &str) -> Option<&str> {
    let mut segments = id.split('/');
    segments
        .by_ref()
        .find(|s| s.eq_ignore_ascii_case("resourceGroups"))?;
    segments.next().filter(|s| !s.is_empty())
}

/// Resource group of a resource ID, lower-cased
pub fn resource_group_from_id(id: &str) -> Option<String> {
    resource_group_segment(id).map(str::to_lowercase)
}

fn flatten_private_endpoint_connections(value: &Value) -> Value {
    let Some(connections) = value.as_array() else {
        return Value::Null;
    };

    let flattened = connections
        .iter()
        .map(|conn| {
            let mut out = Map::new();
            for field in ["id", "name", "type"] {
                if let Some(v) = conn.get(field).filter(|v| !v.is_null()) {
                    out.insert(field.to_string(), v.clone());
                }
            }

            let pairs = [
                ("privateEndpointPropertyId", "properties.privateEndpoint.id"),
                (
                    "privateLinkServiceConnectionStateActionsRequired",
                    "properties.privateLinkServiceConnectionState.actionsRequired",
                ),
                (
                    "privateLinkServiceConnectionStateDescription",
                    "properties.privateLinkServiceConnectionState.description",
                ),
                (
                    "privateLinkServiceConnectionStateStatus",
                    "properties.privateLinkServiceConnectionState.status",
                ),
                ("provisioningState", "properties.provisioningState"),
            ];
            for (key, path) in pairs {
                if let Some(v) = lookup(conn, path).filter(|v| !v.is_null()) {
                    out.insert(key.to_string(), v.clone());
                }
            }

            Value::Object(out)
        })
        .collect();

    Value::Array(flattened)
}

/// RFC 3339 (UTC) for strings and epoch seconds; other values pass through
fn normalize_timestamp(value: Value) -> Value {
    match &value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Value::String(
                    dt.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                );
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                    return Value::String(
                        Utc.from_utc_datetime(&dt)
                            .to_rfc3339_opts(SecondsFormat::Secs, true),
                    );
                }
            }
            value
        }
        Value::Number(n) => match n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()) {
            Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None => value,
        },
        _ => value,
    }
}

/// Coerce a raw value to the column type. Values that cannot be
/// represented become null.
pub fn coerce(value: Value, column_type: ColumnType) -> Value {
    if value.is_null() {
        return value;
    }

    match column_type {
        ColumnType::Json => value,
        ColumnType::String => match value {
            Value::String(_) => value,
            other => Value::String(other.to_string()),
        },
        ColumnType::Bool => match &value {
            Value::Bool(_) => value,
            Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => Value::Null,
        },
        ColumnType::Int => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => value,
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| json!(f as i64))
                .unwrap_or(Value::Null),
            Value::String(s) => s.trim().parse::<i64>().map(|i| json!(i)).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        ColumnType::Double => match &value {
            Value::Number(n) => n.as_f64().map(|f| json!(f)).unwrap_or(Value::Null),
            Value::String(s) => s.trim().parse::<f64>().map(|f| json!(f)).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        ColumnType::Timestamp => normalize_timestamp(value),
    }
}

/// `provisioning_state` -> `provisioningState`
pub fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Look up a dot path; numeric parts index into arrays. `.` is the value itself.
pub fn lookup<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() || path == "." {
        return Some(item);
    }

    let mut current = item;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) if current.is_array() => current.get(idx)?,
            _ => current.get(part)?,
        };
    }
    Some(current)
}

/// Compute one column's value for an item
pub fn column_value(column: &ColumnDef, item: &Value, hydrated: &HashMap<String, Value>) -> Value {
    let mut value = if let Some(constant) = &column.constant {
        constant.clone()
    } else if let Some(name) = &column.hydrate {
        match (hydrated.get(name), column.from.as_deref()) {
            (Some(data), Some(path)) => lookup(data, path).cloned().unwrap_or(Value::Null),
            (Some(data), None) => data.clone(),
            (None, _) => Value::Null,
        }
    } else {
        let path = column
            .from
            .clone()
            .unwrap_or_else(|| snake_to_camel(&column.name));
        lookup(item, &path).cloned().unwrap_or(Value::Null)
    };

    for transform in &column.transforms {
        value = transform.apply(value, item);
    }

    coerce(value, column.column_type)
}

/// Build a row holding `columns` for `item`
pub fn build_row<'a, I>(columns: I, item: &Value, hydrated: &HashMap<String, Value>) -> Row
where
    I: IntoIterator<Item = &'a ColumnDef>,
{
    columns
        .into_iter()
        .map(|column| (column.name.clone(), column_value(column, item, hydrated)))
        .collect()
}

/// Placeholders that hold a whole resource ID
const PATH_VARS: &[&str] = &["id", "parent_id"];

/// Render `{var}` placeholders. Values are URL-encoded, except resource IDs
/// in [`PATH_VARS`] which are inserted as written.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> Result<String, ApiError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| ApiError::Config(format!("unclosed placeholder in '{}'", template)))?;
        let name = &after[..end];
        let value = vars
            .get(name)
            .ok_or_else(|| ApiError::MissingKey(name.to_string()))?;

        if PATH_VARS.contains(&name) && value.starts_with('/') {
            out.push_str(value.trim_end_matches('/'));
        } else {
            out.push_str(&urlencoding::encode(value));
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Format a column value for the text table renderer
pub fn format_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) if arr.iter().all(|v| v.is_string()) && arr.len() <= 3 => arr
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(","),
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(map) if map.is_empty() => "{}".to_string(),
        Value::Object(_) => "[object]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISK_ID: &str =
        "/subscriptions/sub-1/resourceGroups/My-RG/providers/Microsoft.Compute/disks/data-0";

    fn column(name: &str, column_type: ColumnType) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            column_type,
            description: String::new(),
            from: None,
            hydrate: None,
            constant: None,
            transforms: Vec::new(),
        }
    }

    #[test]
    fn test_transform_names_parse() {
        let parsed: Vec<Transform> =
            serde_json::from_value(json!(["to_lower", "id_segment:8", "id_to_akas"])).unwrap();
        assert_eq!(
            parsed,
            vec![Transform::ToLower, Transform::IdSegment(8), Transform::IdToAkas]
        );

        assert!(serde_json::from_value::<Transform>(json!("reverse")).is_err());
        assert!(serde_json::from_value::<Transform>(json!("id_segment:x")).is_err());
    }

    #[test]
    fn test_id_transforms() {
        let id = json!(DISK_ID);
        let item = Value::Null;

        assert_eq!(
            Transform::IdToAkas.apply(id.clone(), &item),
            json!([
                format!("azure://{}", DISK_ID),
                format!("azure://{}", DISK_ID.to_lowercase())
            ])
        );
        assert_eq!(Transform::ResourceGroup.apply(id.clone(), &item), json!("my-rg"));
        assert_eq!(Transform::LastPathElement.apply(id.clone(), &item), json!("data-0"));
        assert_eq!(Transform::IdSegment(8).apply(id.clone(), &item), json!("data-0"));
        assert_eq!(Transform::IdSegment(20).apply(id, &item), Value::Null);
        assert_eq!(Transform::IdToAkas.apply(Value::Null, &item), Value::Null);
    }

    #[test]
    fn test_resource_group_missing() {
        assert_eq!(resource_group_from_id("/subscriptions/sub-1"), None);
        assert_eq!(resource_group_segment(DISK_ID), Some("My-RG"));
        assert_eq!(
            resource_group_from_id("/subscriptions/s/resourcegroups/RG/providers/x"),
            Some("rg".to_string())
        );
    }

    #[test]
    fn test_public_network_access_fallback() {
        let with_connections = json!({"properties": {"privateEndpointConnections": [{"id": "pe"}]}});
        let without = json!({"properties": {}});

        assert_eq!(
            Transform::PublicNetworkAccess.apply(Value::Null, &with_connections),
            json!("Disabled")
        );
        assert_eq!(
            Transform::PublicNetworkAccess.apply(Value::Null, &without),
            json!("Enabled")
        );
        assert_eq!(
            Transform::PublicNetworkAccess.apply(json!("Disabled"), &without),
            json!("Disabled")
        );
        // Any connections list, even an empty one, means access is restricted
        let empty = json!({"properties": {"privateEndpointConnections": []}});
        assert_eq!(
            Transform::PublicNetworkAccess.apply(Value::Null, &empty),
            json!("Disabled")
        );
        let null = json!({"properties": {"privateEndpointConnections": null}});
        assert_eq!(
            Transform::PublicNetworkAccess.apply(Value::Null, &null),
            json!("Enabled")
        );
    }

    #[test]
    fn test_private_endpoint_connections_flatten() {
        let raw = json!([{
            "id": "pec-1",
            "name": "conn",
            "type": "Microsoft.AppConfiguration/configurationStores/privateEndpointConnections",
            "properties": {
                "privateEndpoint": {"id": "/pe/1"},
                "privateLinkServiceConnectionState": {"status": "Approved", "description": "ok"},
                "provisioningState": "Succeeded"
            }
        }]);

        let flat = Transform::PrivateEndpointConnections.apply(raw, &Value::Null);
        assert_eq!(flat[0]["privateEndpointPropertyId"], "/pe/1");
        assert_eq!(flat[0]["privateLinkServiceConnectionStateStatus"], "Approved");
        assert_eq!(flat[0]["provisioningState"], "Succeeded");
        assert!(flat[0].get("privateLinkServiceConnectionStateActionsRequired").is_none());
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(json!(3), ColumnType::String), json!("3"));
        assert_eq!(coerce(json!("42"), ColumnType::Int), json!(42));
        assert_eq!(coerce(json!("many"), ColumnType::Int), Value::Null);
        assert_eq!(coerce(json!(2.0), ColumnType::Int), json!(2));
        assert_eq!(coerce(json!("True"), ColumnType::Bool), json!(true));
        assert_eq!(coerce(json!(1.5), ColumnType::Double), json!(1.5));
        assert_eq!(
            coerce(json!("2024-03-01T10:00:00+02:00"), ColumnType::Timestamp),
            json!("2024-03-01T08:00:00Z")
        );
        assert_eq!(coerce(json!({"a": 1}), ColumnType::Json), json!({"a": 1}));
        assert_eq!(coerce(Value::Null, ColumnType::Bool), Value::Null);
    }

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(snake_to_camel("provisioning_state"), "provisioningState");
        assert_eq!(snake_to_camel("id"), "id");
        assert_eq!(snake_to_camel("sample_count"), "sampleCount");
    }

    #[test]
    fn test_lookup_paths() {
        let item = json!({"properties": {"rules": [{"name": "r0"}]}});
        assert_eq!(lookup(&item, "properties.rules.0.name"), Some(&json!("r0")));
        assert_eq!(lookup(&item, "properties.missing"), None);
        assert_eq!(lookup(&item, "."), Some(&item));
    }

    #[test]
    fn test_build_row_sources() {
        let item = json!({
            "id": DISK_ID,
            "properties": {"diskSizeGB": 128, "provisioningState": "Succeeded"}
        });

        let mut size = column("disk_size_gb", ColumnType::Int);
        size.from = Some("properties.diskSizeGB".to_string());

        let mut rg = column("resource_group", ColumnType::String);
        rg.from = Some("id".to_string());
        rg.transforms = vec![Transform::ResourceGroup];

        let mut title = column("title", ColumnType::String);
        title.constant = Some(json!("Disk"));

        let mut sub = column("subscription_id", ColumnType::String);
        sub.hydrate = Some("subscription_id".to_string());

        let hydrated: HashMap<String, Value> =
            [("subscription_id".to_string(), json!("sub-1"))].into();

        let columns = [column("id", ColumnType::String), size, rg, title, sub];
        let row = build_row(&columns, &item, &hydrated);

        assert_eq!(row["id"], json!(DISK_ID));
        assert_eq!(row["disk_size_gb"], json!(128));
        assert_eq!(row["resource_group"], json!("my-rg"));
        assert_eq!(row["title"], json!("Disk"));
        assert_eq!(row["subscription_id"], json!("sub-1"));
    }

    #[test]
    fn test_render_template() {
        let vars: BTreeMap<String, String> = [
            ("subscription_id".to_string(), "sub-1".to_string()),
            ("name".to_string(), "my watcher".to_string()),
            ("id".to_string(), "/subscriptions/sub-1/x/".to_string()),
        ]
        .into();

        assert_eq!(
            render_template("/subscriptions/{subscription_id}/w/{name}", &vars).unwrap(),
            "/subscriptions/sub-1/w/my%20watcher"
        );
        assert_eq!(render_template("{id}", &vars).unwrap(), "/subscriptions/sub-1/x");
        assert!(matches!(
            render_template("/{missing}", &vars),
            Err(ApiError::MissingKey(_))
        ));
        assert!(render_template("/{name", &vars).is_err());
    }

    #[test]
    fn test_render_template_encodes_slashes_outside_id_vars() {
        let vars: BTreeMap<String, String> = [
            ("name".to_string(), "/".to_string()),
            ("resource_group".to_string(), "/a/b".to_string()),
        ]
        .into();

        assert_eq!(
            render_template("/rg/{resource_group}/w/{name}", &vars).unwrap(),
            "/rg/%2Fa%2Fb/w/%2F"
        );
    }

    #[test]
    fn test_format_cell() {
        assert_eq!(format_cell(&Value::Null), "-");
        assert_eq!(format_cell(&json!(["a", "b"])), "a,b");
        assert_eq!(format_cell(&json!([1, 2, 3, 4])), "[4 items]");
        assert_eq!(format_cell(&json!({"k": 1})), "[object]");
    }
}
