//! Shared domain types for the QPS autoscaling controller.
//!
//! Mirrors the teacher's `fc-common`: plain data types shared across
//! facade, engine, and controller crates, plus structured logging setup.

pub mod logging;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Catalog entities (§3)
// ============================================================================

/// A tenant's scaling configuration, as read from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceGroup {
    pub id: i64,
    pub lb_id: String,
    pub asg_id: String,
    pub region: String,
    pub target_qps_per_instance: f64,
    pub scale_up_cooldown_s: i64,
    pub scale_down_cooldown_s: i64,
    pub general_cooldown_s: i64,
    pub metric_period_s: i64,
    pub max_scale_up_per_action: i64,
    pub max_scale_down_per_action: i64,
    pub enable_dynamic_scaling: bool,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub dry_run: bool,
    pub enabled: bool,
    pub alert_webhook_url: Option<String>,
}

impl ResourceGroup {
    /// Validates the invariants from spec.md §3. Called by the catalog
    /// reader on every row and by the `validation` event handler.
    pub fn validate(&self) -> Result<(), String> {
        if self.target_qps_per_instance <= 0.0 {
            return Err(format!(
                "resource_group {}: target_qps_per_instance must be > 0, got {}",
                self.id, self.target_qps_per_instance
            ));
        }
        if !(self.scale_down_threshold < self.scale_up_threshold
            && self.scale_up_threshold <= 1.0
            && self.scale_down_threshold > 0.0)
        {
            return Err(format!(
                "resource_group {}: thresholds must satisfy 0 < scale_down_threshold < scale_up_threshold <= 1 (down={}, up={})",
                self.id, self.scale_down_threshold, self.scale_up_threshold
            ));
        }
        if self.metric_period_s <= 0 {
            return Err(format!(
                "resource_group {}: metric_period_s must be > 0, got {}",
                self.id, self.metric_period_s
            ));
        }
        if self.metric_period_s < 30 {
            tracing::warn!(
                group_id = self.id,
                metric_period_s = self.metric_period_s,
                "metric_period_s below 30s is not recommended"
            );
        }
        if self.scale_up_cooldown_s < 0 || self.scale_down_cooldown_s < 0 || self.general_cooldown_s < 0 {
            return Err(format!("resource_group {}: cooldowns must be >= 0", self.id));
        }
        Ok(())
    }
}

/// Point-in-time snapshot of an ASG, as reported by the ASG facade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AsgStatus {
    pub min_instances: i64,
    pub max_instances: i64,
    pub desired_instances: i64,
    pub current_instances: i64,
    pub lifecycle_state: AsgLifecycleState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AsgLifecycleState {
    InService,
    Updating,
    Deleting,
    Unknown,
}

/// A single recent ASG scaling activity, used for cooldown cross-checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsgActivity {
    pub activity_type: AsgActivityType,
    pub status_code: AsgActivityStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AsgActivityType {
    ScaleOut,
    ScaleIn,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AsgActivityStatus {
    Init,
    Running,
    Success,
    PartialSuccess,
    Failed,
    Rejected,
}

impl AsgActivityStatus {
    /// Statuses that count toward cooldown windows (§4.3).
    pub fn counts_for_cooldown(self) -> bool {
        matches!(
            self,
            Self::Success | Self::PartialSuccess | Self::Running | Self::Init
        )
    }

    /// Statuses that mean "an activity is in progress" (§4.2 step 1).
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Init | Self::Running)
    }
}

// ============================================================================
// Runtime state (§3)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupRuntimeState {
    pub resource_group_id: i64,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub consecutive_errors: i64,
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub suspended: bool,
    pub latest_qps: Option<f64>,
    pub latest_capacity: Option<i64>,
}

impl GroupRuntimeState {
    pub fn is_circuit_open(&self, now: DateTime<Utc>) -> bool {
        self.circuit_open_until.is_some_and(|t| t > now)
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|t| t > now)
    }
}

/// Fields of `GroupRuntimeState` that a single evaluation is allowed to
/// write. Mirrors the original's `valid_columns` allow-list in
/// `db_manager.update_resource_group_state` — unknown fields are dropped.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<Option<DateTime<Utc>>>,
    pub consecutive_errors: Option<i64>,
    pub circuit_open_until: Option<Option<DateTime<Utc>>>,
    pub suspended: Option<bool>,
    pub latest_qps: Option<Option<f64>>,
    pub latest_capacity: Option<Option<i64>>,
}

// ============================================================================
// Activity / error records (§3)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScalingActionKind {
    None,
    ScaleUp,
    ScaleDown,
}

impl std::fmt::Display for ScalingActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Success,
    Error,
    DryRun,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingActivity {
    pub id: i64,
    pub resource_group_id: i64,
    pub activity_key: String,
    pub action: ScalingActionKind,
    pub status: ActivityStatus,
    pub eval_qps: Option<f64>,
    pub eval_capacity: Option<i64>,
    pub target_qps: Option<f64>,
    pub response_blob: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A row to insert; `id`/`created_at` are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewScalingActivity {
    pub resource_group_id: i64,
    pub activity_key: String,
    pub action: ScalingActionKind,
    pub status: ActivityStatus,
    pub eval_qps: Option<f64>,
    pub eval_capacity: Option<i64>,
    pub target_qps: Option<f64>,
    pub response_blob: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub id: i64,
    pub resource_group_id: Option<i64>,
    pub source: String,
    pub message: String,
    pub context_blob: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewErrorRecord {
    pub resource_group_id: Option<i64>,
    pub source: String,
    pub message: String,
    pub context_blob: serde_json::Value,
}

// ============================================================================
// Decision (§4.2)
// ============================================================================

/// Enumerated reason codes. Kept as a closed set rather than a free-form
/// string so callers can match exhaustively; `Display` renders the exact
/// wire string used in logs, activity records, and the invocation result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    ScalingInProgress,
    CircuitOpen,
    Suspended,
    MetricsUnavailable,
    DynamicScalingScaleUp,
    DynamicScalingScaleDown,
    DynamicScalingLimitedScaleUp,
    DynamicScalingLimitedScaleDown,
    AtAsgMinCapacity,
    AtAsgMaxCapacity,
    OptimalInstanceCountReached,
    QpsAboveThreshold,
    QpsBelowThreshold,
    AsgStatusError,
    CooldownGeneral,
    CooldownScaleUp,
    CooldownScaleDown,
    DuplicateActivity,
    EvaluationError,
    Timeout,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ScalingInProgress => "scaling_in_progress",
            Self::CircuitOpen => "circuit_open",
            Self::Suspended => "suspended",
            Self::MetricsUnavailable => "metrics_unavailable",
            Self::DynamicScalingScaleUp => "dynamic_scaling_scale_up",
            Self::DynamicScalingScaleDown => "dynamic_scaling_scale_down",
            Self::DynamicScalingLimitedScaleUp => "dynamic_scaling_limited_scale_up",
            Self::DynamicScalingLimitedScaleDown => "dynamic_scaling_limited_scale_down",
            Self::AtAsgMinCapacity => "at_asg_min_capacity",
            Self::AtAsgMaxCapacity => "at_asg_max_capacity",
            Self::OptimalInstanceCountReached => "optimal_instance_count_reached",
            Self::QpsAboveThreshold => "qps_above_threshold",
            Self::QpsBelowThreshold => "qps_below_threshold",
            Self::AsgStatusError => "asg_status_error",
            Self::CooldownGeneral => "cooldown_general",
            Self::CooldownScaleUp => "cooldown_scale_up",
            Self::CooldownScaleDown => "cooldown_scale_down",
            Self::DuplicateActivity => "duplicate_activity",
            Self::EvaluationError => "evaluation_error",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    DryRun,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub message: Option<String>,
    pub response_blob: Option<serde_json::Value>,
}

/// The full per-group evaluation outcome (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub resource_group_id: i64,
    pub action: ScalingActionKind,
    pub reason: DecisionReason,
    pub current_qps: Option<f64>,
    pub current_instances: Option<i64>,
    pub qps_per_instance: Option<f64>,
    pub optimal_instances: Option<i64>,
    pub required_change: Option<i64>,
    pub scaling_amount: Option<i64>,
    pub limited_by_safety: bool,
    pub limited_by_asg: bool,
    pub cooldown_remaining_s: Option<i64>,
    pub activity_key: Option<String>,
    pub execution_result: Option<ExecutionResult>,
    pub error: Option<String>,
}

impl Decision {
    pub fn none(resource_group_id: i64, reason: DecisionReason) -> Self {
        Self {
            resource_group_id,
            action: ScalingActionKind::None,
            reason,
            current_qps: None,
            current_instances: None,
            qps_per_instance: None,
            optimal_instances: None,
            required_change: None,
            scaling_amount: None,
            limited_by_safety: false,
            limited_by_asg: false,
            cooldown_remaining_s: None,
            activity_key: None,
            execution_result: None,
            error: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

// ============================================================================
// Error taxonomy (§7)
// ============================================================================

#[derive(Error, Debug)]
pub enum AscError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),

    #[error("ASG read error: {0}")]
    AsgRead(String),

    #[error("ASG write error: {0}")]
    AsgWrite(String),

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("tick deadline exceeded")]
    DeadlineExceeded,

    #[error("duplicate activity: {0}")]
    DuplicateActivity(String),
}

impl AscError {
    /// Whether this error kind is fatal to the whole tick (§7) as opposed
    /// to a soft per-group failure that still yields a `Decision`.
    pub fn is_tick_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Catalog(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(up: f64, down: f64, target: f64) -> ResourceGroup {
        ResourceGroup {
            id: 1,
            lb_id: "lb-1".into(),
            asg_id: "asg-1".into(),
            region: "us-east-1".into(),
            target_qps_per_instance: target,
            scale_up_cooldown_s: 300,
            scale_down_cooldown_s: 600,
            general_cooldown_s: 180,
            metric_period_s: 300,
            max_scale_up_per_action: 0,
            max_scale_down_per_action: 0,
            enable_dynamic_scaling: true,
            scale_up_threshold: up,
            scale_down_threshold: down,
            dry_run: false,
            enabled: true,
            alert_webhook_url: None,
        }
    }

    #[test]
    fn validate_rejects_bad_thresholds() {
        assert!(group(0.8, 0.9, 50.0).validate().is_err());
        assert!(group(0.8, 0.4, 50.0).validate().is_ok());
    }

    #[test]
    fn validate_rejects_nonpositive_target() {
        assert!(group(0.8, 0.4, 0.0).validate().is_err());
        assert!(group(0.8, 0.4, -5.0).validate().is_err());
    }

    #[test]
    fn circuit_and_cooldown_windows() {
        let now = Utc::now();
        let mut state = GroupRuntimeState {
            resource_group_id: 1,
            ..Default::default()
        };
        assert!(!state.is_circuit_open(now));
        assert!(!state.is_in_cooldown(now));

        state.circuit_open_until = Some(now + chrono::Duration::seconds(60));
        assert!(state.is_circuit_open(now));

        state.cooldown_until = Some(now - chrono::Duration::seconds(1));
        assert!(!state.is_in_cooldown(now));
    }
}
