//! Signed HTTP implementation of `AsgFacade` against a cloud autoscaling API
//! shaped like `DescribeScalingGroups` / `ModifyScalingGroup` /
//! `DescribeScalingActivities`.

use crate::AsgFacade;
use asc_common::{AsgActivity, AsgActivityStatus, AsgActivityType, AscError, AsgLifecycleState, AsgStatus};
use asc_config::ClientConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

const SIGNATURE_HEADER: &str = "X-Asc-Signature";
const TIMESTAMP_HEADER: &str = "X-Asc-Timestamp";
const ACCESS_KEY_HEADER: &str = "X-Asc-Access-Key";

type HmacSha256 = Hmac<Sha256>;

fn sign_request(body: &str, secret_key: &str) -> (String, String) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    let signature_payload = format!("{timestamp}{body}");

    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signature_payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    (signature, timestamp)
}

#[derive(Debug, Deserialize)]
struct DescribeScalingGroupsResponse {
    #[serde(rename = "Result", default)]
    result: Option<ScalingGroupsResult>,
}

#[derive(Debug, Deserialize)]
struct ScalingGroupsResult {
    #[serde(rename = "ScalingGroups", default)]
    scaling_groups: Vec<ScalingGroup>,
}

#[derive(Debug, Deserialize)]
struct ScalingGroup {
    #[serde(rename = "LifecycleState")]
    lifecycle_state: String,
    #[serde(rename = "TotalInstanceCount")]
    total_instance_count: i64,
    #[serde(rename = "DesireInstanceNumber")]
    desire_instance_number: i64,
    #[serde(rename = "MinInstanceNumber")]
    min_instance_number: i64,
    #[serde(rename = "MaxInstanceNumber")]
    max_instance_number: i64,
}

#[derive(Debug, Deserialize)]
struct DescribeScalingActivitiesResponse {
    #[serde(rename = "Result", default)]
    result: Option<ScalingActivitiesResult>,
}

#[derive(Debug, Deserialize)]
struct ScalingActivitiesResult {
    #[serde(rename = "ScalingActivities", default)]
    scaling_activities: Vec<RawActivity>,
}

#[derive(Debug, Deserialize)]
struct RawActivity {
    #[serde(rename = "ActivityType")]
    activity_type: String,
    #[serde(rename = "StatusCode")]
    status_code: String,
    #[serde(rename = "CreatedAt")]
    created_at: DateTime<Utc>,
}

fn parse_lifecycle_state(s: &str) -> AsgLifecycleState {
    match s {
        "InService" => AsgLifecycleState::InService,
        "Updating" => AsgLifecycleState::Updating,
        "Deleting" => AsgLifecycleState::Deleting,
        _ => AsgLifecycleState::Unknown,
    }
}

fn parse_activity_type(s: &str) -> AsgActivityType {
    match s {
        "ScaleOut" => AsgActivityType::ScaleOut,
        "ScaleIn" => AsgActivityType::ScaleIn,
        _ => AsgActivityType::Other,
    }
}

fn parse_activity_status(s: &str) -> AsgActivityStatus {
    match s {
        "Init" => AsgActivityStatus::Init,
        "Running" => AsgActivityStatus::Running,
        "Success" => AsgActivityStatus::Success,
        "PartialSuccess" => AsgActivityStatus::PartialSuccess,
        "Rejected" => AsgActivityStatus::Rejected,
        _ => AsgActivityStatus::Failed,
    }
}

pub struct HttpAsgFacade {
    client: Client,
    config: ClientConfig,
}

impl HttpAsgFacade {
    pub fn new(config: ClientConfig) -> Result<Self, AscError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AscError::AsgRead(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn call(&self, action: &str, query: &HashMap<&str, String>) -> Result<reqwest::Response, AscError> {
        let body = serde_json::to_string(query).map_err(|e| AscError::AsgRead(e.to_string()))?;
        let (signature, timestamp) = sign_request(&body, &self.config.secret_key);

        self.client
            .get(format!("{}/{}", self.config.base_url, action))
            .header(ACCESS_KEY_HEADER, &self.config.access_key)
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, timestamp)
            .query(query)
            .send()
            .await
            .map_err(|e| AscError::AsgRead(e.to_string()))
    }
}

#[async_trait]
impl AsgFacade for HttpAsgFacade {
    async fn get_status(&self, asg_id: &str) -> Result<AsgStatus, AscError> {
        let mut query = HashMap::new();
        query.insert("ScalingGroupIds.1", asg_id.to_string());

        let response = self.call("DescribeScalingGroups", &query).await?;
        if !response.status().is_success() {
            return Err(AscError::AsgRead(format!("asg backend returned {}", response.status())));
        }

        let parsed: DescribeScalingGroupsResponse =
            response.json().await.map_err(|e| AscError::AsgRead(e.to_string()))?;

        let group = parsed
            .result
            .and_then(|r| r.scaling_groups.into_iter().next())
            .ok_or_else(|| AscError::AsgRead(format!("scaling group {asg_id} not found")))?;

        Ok(AsgStatus {
            min_instances: group.min_instance_number,
            max_instances: group.max_instance_number,
            desired_instances: group.desire_instance_number,
            current_instances: group.total_instance_count,
            lifecycle_state: parse_lifecycle_state(&group.lifecycle_state),
        })
    }

    async fn is_activity_in_progress(&self, asg_id: &str) -> Result<bool, AscError> {
        let activities = self.list_recent_activities(asg_id, 1).await?;
        Ok(activities.first().is_some_and(|a| a.status_code.is_in_progress()))
    }

    async fn list_recent_activities(&self, asg_id: &str, limit: u32) -> Result<Vec<AsgActivity>, AscError> {
        let mut query = HashMap::new();
        query.insert("ScalingGroupId", asg_id.to_string());
        query.insert("PageSize", limit.to_string());

        let response = self.call("DescribeScalingActivities", &query).await?;
        if !response.status().is_success() {
            return Err(AscError::AsgRead(format!("asg backend returned {}", response.status())));
        }

        let parsed: DescribeScalingActivitiesResponse =
            response.json().await.map_err(|e| AscError::AsgRead(e.to_string()))?;

        let activities = parsed
            .result
            .map(|r| r.scaling_activities)
            .unwrap_or_default()
            .into_iter()
            .map(|a| AsgActivity {
                activity_type: parse_activity_type(&a.activity_type),
                status_code: parse_activity_status(&a.status_code),
                created_at: a.created_at,
            })
            .collect();

        Ok(activities)
    }

    async fn modify_capacity(&self, asg_id: &str, desired_capacity: i64) -> Result<(), AscError> {
        let status = self.get_status(asg_id).await?;
        if desired_capacity < status.min_instances || desired_capacity > status.max_instances {
            return Err(AscError::AsgWrite(format!(
                "desired capacity {desired_capacity} must be between min {} and max {}",
                status.min_instances, status.max_instances
            )));
        }

        let mut query = HashMap::new();
        query.insert("ScalingGroupId", asg_id.to_string());
        query.insert("DesireInstanceNumber", desired_capacity.to_string());

        let response = self.call("ModifyScalingGroup", &query).await?;
        if !response.status().is_success() {
            return Err(AscError::AsgWrite(format!("asg backend returned {}", response.status())));
        }

        info!(asg_id, desired_capacity, "modified scaling group capacity");
        Ok(())
    }
}
