//! Signed HTTP implementation of `MetricsFacade` against a CloudMonitor-style
//! `GetMetricData` endpoint.

use crate::{period_for_window, MetricsFacade};
use asc_common::AscError;
use asc_config::ClientConfig;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const SIGNATURE_HEADER: &str = "X-Asc-Signature";
const TIMESTAMP_HEADER: &str = "X-Asc-Timestamp";
const ACCESS_KEY_HEADER: &str = "X-Asc-Access-Key";

type HmacSha256 = Hmac<Sha256>;

/// Signs a request body the same way the autoscaler signs every outbound
/// call: HMAC-SHA256 over `timestamp + body`, hex-encoded.
fn sign_request(body: &str, secret_key: &str) -> (String, String) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    let signature_payload = format!("{timestamp}{body}");

    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signature_payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    (signature, timestamp)
}

#[derive(Debug, Serialize)]
struct Dimension<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Value")]
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct Instance<'a> {
    #[serde(rename = "Dimensions")]
    dimensions: Vec<Dimension<'a>>,
}

#[derive(Debug, Serialize)]
struct GetMetricDataRequest<'a> {
    #[serde(rename = "MetricName")]
    metric_name: &'a str,
    #[serde(rename = "StartTime")]
    start_time: i64,
    #[serde(rename = "EndTime")]
    end_time: i64,
    #[serde(rename = "Namespace")]
    namespace: &'a str,
    #[serde(rename = "Instances")]
    instances: Vec<Instance<'a>>,
    #[serde(rename = "GroupBy")]
    group_by: Vec<&'a str>,
    #[serde(rename = "SubNamespace")]
    sub_namespace: &'a str,
    #[serde(rename = "Region")]
    region: &'a str,
    #[serde(rename = "Period")]
    period: &'a str,
}

#[derive(Debug, Deserialize)]
struct GetMetricDataResponse {
    #[serde(rename = "Result", default)]
    result: Option<MetricResult>,
}

#[derive(Debug, Deserialize)]
struct MetricResult {
    #[serde(rename = "Data", default)]
    data: Option<MetricDataWrapper>,
}

#[derive(Debug, Deserialize)]
struct MetricDataWrapper {
    #[serde(rename = "MetricDataResults", default)]
    metric_data_results: Vec<MetricDataResult>,
}

#[derive(Debug, Deserialize)]
struct MetricDataResult {
    #[serde(rename = "Dimensions", default)]
    dimensions: Vec<DimensionValue>,
    #[serde(rename = "DataPoints", default)]
    data_points: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
struct DimensionValue {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct DataPoint {
    #[serde(rename = "Value", default)]
    value: f64,
}

pub struct HttpMetricsFacade {
    client: Client,
    config: ClientConfig,
}

impl HttpMetricsFacade {
    pub fn new(config: ClientConfig) -> Result<Self, AscError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AscError::MetricsUnavailable(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl MetricsFacade for HttpMetricsFacade {
    async fn batch_average_qps(
        &self,
        lb_ids: &[String],
        window_s: i64,
    ) -> Result<HashMap<String, Option<f64>>, AscError> {
        if lb_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let period = period_for_window(window_s);
        let end_time = Utc::now();
        let start_time = end_time - chrono::Duration::seconds(window_s);

        let request = GetMetricDataRequest {
            metric_name: "load_balancer_qps",
            start_time: start_time.timestamp(),
            end_time: end_time.timestamp(),
            namespace: "VCM_ALB",
            instances: lb_ids
                .iter()
                .map(|id| Instance {
                    dimensions: vec![Dimension {
                        name: "ResourceID",
                        value: id,
                    }],
                })
                .collect(),
            group_by: vec![],
            sub_namespace: "loadbalancer",
            region: &self.config.region,
            period,
        };

        let body = serde_json::to_string(&request).map_err(|e| AscError::MetricsUnavailable(e.to_string()))?;
        let (signature, timestamp) = sign_request(&body, &self.config.secret_key);

        debug!(lb_count = lb_ids.len(), period, "fetching batch QPS metrics");

        let response = self
            .client
            .post(format!("{}/GetMetricData", self.config.base_url))
            .header(ACCESS_KEY_HEADER, &self.config.access_key)
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, timestamp)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AscError::MetricsUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AscError::MetricsUnavailable(format!(
                "metrics backend returned {}",
                response.status()
            )));
        }

        let parsed: GetMetricDataResponse = response
            .json()
            .await
            .map_err(|e| AscError::MetricsUnavailable(e.to_string()))?;

        let mut grouped: HashMap<String, Vec<f64>> = lb_ids.iter().map(|id| (id.clone(), Vec::new())).collect();

        if let Some(result) = parsed.result {
            if let Some(data) = result.data {
                for (idx, series) in data.metric_data_results.into_iter().enumerate() {
                    let resource_id = series
                        .dimensions
                        .iter()
                        .find(|d| d.name == "ResourceID")
                        .map(|d| d.value.clone())
                        .or_else(|| lb_ids.get(idx).cloned());

                    let Some(resource_id) = resource_id else {
                        continue;
                    };

                    grouped
                        .entry(resource_id)
                        .or_default()
                        .extend(series.data_points.iter().map(|p| p.value));
                }
            }
        }

        let averages = lb_ids
            .iter()
            .map(|id| {
                let points = grouped.get(id).cloned().unwrap_or_default();
                if points.is_empty() {
                    warn!(lb_id = %id, "no data points returned for load balancer");
                    (id.clone(), None)
                } else {
                    (id.clone(), Some(points.iter().sum::<f64>() / points.len() as f64))
                }
            })
            .collect();

        Ok(averages)
    }
}
