//! Azure Monitor metric statistics
//!
//! Turns a metrics response into one item per data point, shaped for the
//! standard metric columns.

use super::registry::{Granularity, MetricDef};
use crate::azure::client::AzureClient;
use crate::azure::error::ApiError;
use crate::plugin::Cancellation;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};

const METRICS_API_VERSION: &str = "2018-01-01";
const AGGREGATIONS: &str = "average,count,maximum,minimum,total";

impl Granularity {
    /// ISO 8601 interval passed to the metrics API
    pub fn interval(&self) -> &'static str {
        match self {
            Self::FiveMinutes => "PT5M",
            Self::Hourly => "PT1H",
            Self::Daily => "P1D",
        }
    }

    /// How far back the statistics window reaches
    pub fn lookback(&self) -> Duration {
        match self {
            Self::FiveMinutes => Duration::days(5),
            Self::Hourly => Duration::days(60),
            Self::Daily => Duration::days(365),
        }
    }
}

/// `start/end` timespan ending at `now`
pub fn timespan(granularity: Granularity, now: DateTime<Utc>) -> String {
    let start = now - granularity.lookback();
    format!(
        "{}/{}",
        start.to_rfc3339_opts(SecondsFormat::Secs, true),
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Fetch metric data points for one resource
pub async fn list_metric_statistics(
    client: &AzureClient,
    resource_id: &str,
    metric: &MetricDef,
    cancel: &Cancellation,
) -> Result<Vec<Value>, ApiError> {
    let path = format!("{}/providers/Microsoft.Insights/metrics", resource_id);
    let span = timespan(metric.granularity, Utc::now());
    let url = client.management_url_with_query(
        &path,
        METRICS_API_VERSION,
        &[
            ("metricnames", metric.metric.as_str()),
            ("metricnamespace", metric.namespace.as_str()),
            ("timespan", span.as_str()),
            ("interval", metric.granularity.interval()),
            ("aggregation", AGGREGATIONS),
        ],
    )?;

    let response = client.get(&url, cancel).await?;
    Ok(data_points(&response, resource_id, &metric.namespace))
}

/// Flatten `value[].timeseries[].data[]`, skipping points with no aggregates
pub fn data_points(response: &Value, resource_id: &str, namespace: &str) -> Vec<Value> {
    let Some(metrics) = response.get("value").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut points = Vec::new();
    for metric in metrics {
        let name = metric
            .pointer("/name/value")
            .cloned()
            .unwrap_or(Value::Null);
        let unit = metric.get("unit").cloned().unwrap_or(Value::Null);

        let series = metric
            .get("timeseries")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for ts in series {
            let data = ts.get("data").and_then(Value::as_array).into_iter().flatten();
            for point in data {
                let field = |key: &str| point.get(key).cloned().unwrap_or(Value::Null);
                let (average, count, maximum, minimum, total) = (
                    field("average"),
                    field("count"),
                    field("maximum"),
                    field("minimum"),
                    field("total"),
                );

                if [&average, &count, &maximum, &minimum, &total]
                    .iter()
                    .all(|v| v.is_null())
                {
                    continue;
                }

                points.push(json!({
                    "dimensionValue": resource_id,
                    "metricName": name,
                    "namespace": namespace,
                    "unit": unit,
                    "timestamp": field("timeStamp"),
                    "average": average,
                    "maximum": maximum,
                    "minimum": minimum,
                    "sampleCount": count,
                    "sum": total,
                }));
            }
        }
    }

    points
}
