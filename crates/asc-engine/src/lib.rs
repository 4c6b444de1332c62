//! Per-group decision engine. `Engine::evaluate` runs the full evaluation
//! pipeline for a single resource group: in-progress guard, circuit
//! breaker, sizing, cooldown gating, idempotent execution, and state
//! recording.

mod cooldown;
mod sizing;

pub use sizing::{ClampDirection, SizingResult};

use asc_asg::AsgFacade;
use asc_common::{
    ActivityStatus, AscError, Decision, DecisionReason, ExecutionResult, ExecutionStatus, NewScalingActivity,
    ResourceGroup, ScalingActionKind, StateUpdate,
};
use asc_config::CircuitBreakerConfig;
use asc_metrics::MetricsFacade;
use asc_state::{ActivityOutcome, StateRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct Engine {
    metrics: Arc<dyn MetricsFacade>,
    asg: Arc<dyn AsgFacade>,
    state: Arc<dyn StateRepository>,
    circuit_breaker: CircuitBreakerConfig,
}

impl Engine {
    pub fn new(
        metrics: Arc<dyn MetricsFacade>,
        asg: Arc<dyn AsgFacade>,
        state: Arc<dyn StateRepository>,
        circuit_breaker: CircuitBreakerConfig,
    ) -> Self {
        Self { metrics, asg, state, circuit_breaker }
    }

    /// Evaluates and, unless dry-run or a gate fires first, acts on a
    /// single group. `prefetched_qps` is the controller's one batched
    /// metrics call result for this group's load balancer, if it got one;
    /// `None` falls back to a single-group metrics call so a group can
    /// still be evaluated if it was missing from the batch.
    #[instrument(skip(self, group), fields(group_id = group.id, asg_id = %group.asg_id))]
    pub async fn evaluate(
        &self,
        group: &ResourceGroup,
        prefetched_qps: Option<Option<f64>>,
        now: DateTime<Utc>,
    ) -> Decision {
        match self.evaluate_inner(group, prefetched_qps, now).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, "evaluation failed");
                self.record_failure(group, &err, now).await;
                Decision::none(group.id, DecisionReason::EvaluationError).with_error(err.to_string())
            }
        }
    }

    async fn evaluate_inner(
        &self,
        group: &ResourceGroup,
        prefetched_qps: Option<Option<f64>>,
        now: DateTime<Utc>,
    ) -> Result<Decision, AscError> {
        // Step 1: never act while the ASG itself is mid-change.
        if self.asg.is_activity_in_progress(&group.asg_id).await? {
            return Ok(Decision::none(group.id, DecisionReason::ScalingInProgress));
        }

        // Step 2: suspension / circuit breaker.
        let runtime_state = self.state.get_state(group.id).await?;
        if runtime_state.suspended {
            return Ok(Decision::none(group.id, DecisionReason::Suspended));
        }
        if runtime_state.is_circuit_open(now) {
            return Ok(Decision::none(group.id, DecisionReason::CircuitOpen));
        }

        // Step 3: metrics, with a single-group fallback if the batch call
        // didn't cover this group's load balancer.
        let current_qps = match prefetched_qps {
            Some(qps) => qps,
            None => {
                self.metrics
                    .batch_average_qps(std::slice::from_ref(&group.lb_id), group.metric_period_s)
                    .await?
                    .remove(&group.lb_id)
                    .flatten()
            }
        };
        let current_qps = match current_qps {
            Some(qps) => qps,
            None => {
                return Ok(Decision::none(group.id, DecisionReason::MetricsUnavailable)
                    .with_error("failed to retrieve required metrics".to_string()));
            }
        };

        // Step 4: capacity.
        let status = match self.asg.get_status(&group.asg_id).await {
            Ok(status) => status,
            Err(err) => {
                self.increment_errors(group, &err, now).await;
                return Ok(Decision::none(group.id, DecisionReason::AsgStatusError).with_error(err.to_string()));
            }
        };

        // Step 5: qps-per-instance, never dividing by a cold-start zero.
        let qps_per_instance = if status.current_instances > 0 {
            current_qps / status.current_instances as f64
        } else {
            0.0
        };

        // Step 6: sizing. A non-positive target can reach here despite
        // `ResourceGroup::validate` rejecting it at load time, if a group's
        // row was edited directly in the catalog store; log it once per
        // evaluation rather than let `dynamic_optimal` silently collapse to
        // zero.
        if group.target_qps_per_instance <= 0.0 {
            warn!(
                group_id = group.id,
                target_qps_per_instance = group.target_qps_per_instance,
                "resource group has a non-positive target_qps_per_instance, sizing will floor to zero"
            );
        }

        let sizing_result = if group.enable_dynamic_scaling {
            sizing::dynamic_optimal(current_qps, group.target_qps_per_instance, status.min_instances, status.max_instances)
        } else {
            sizing::static_optimal(
                qps_per_instance,
                status.current_instances,
                group.target_qps_per_instance,
                group.scale_up_threshold,
                group.scale_down_threshold,
                status.min_instances,
                status.max_instances,
            )
        };
        let required_change = sizing_result.optimal - status.current_instances;

        // Step 7: safety caps.
        let (scaling_amount, limited_by_safety) =
            sizing::apply_safety_cap(required_change, group.max_scale_up_per_action, group.max_scale_down_per_action);

        // Step 8: action classification.
        let action = if scaling_amount > 0 {
            ScalingActionKind::ScaleUp
        } else if scaling_amount < 0 {
            ScalingActionKind::ScaleDown
        } else {
            ScalingActionKind::None
        };

        let mut decision = Decision {
            resource_group_id: group.id,
            action,
            reason: classify_reason(action, sizing_result.clamped, limited_by_safety, group.enable_dynamic_scaling),
            current_qps: Some(current_qps),
            current_instances: Some(status.current_instances),
            qps_per_instance: Some(qps_per_instance),
            optimal_instances: Some(sizing_result.optimal),
            required_change: Some(required_change),
            scaling_amount: Some(scaling_amount),
            limited_by_safety,
            limited_by_asg: sizing_result.clamped.is_some(),
            cooldown_remaining_s: None,
            activity_key: None,
            execution_result: None,
            error: None,
        };

        if action == ScalingActionKind::None {
            self.reset_errors(group.id).await;
            self.touch_runtime(group.id, current_qps, status.current_instances, now).await;
            return Ok(decision);
        }

        // Step 9: cooldown gate.
        if let Some(block) = cooldown::local_block(runtime_state.cooldown_until, now, action) {
            decision.action = ScalingActionKind::None;
            decision.reason = block.reason;
            decision.cooldown_remaining_s = Some(block.remaining_s);
            self.reset_errors(group.id).await;
            return Ok(decision);
        }
        let recent_activities = self.asg.list_recent_activities(&group.asg_id, 20).await?;
        if let Some(block) = cooldown::authoritative_block(
            &recent_activities,
            now,
            action,
            group.general_cooldown_s,
            group.scale_up_cooldown_s,
            group.scale_down_cooldown_s,
        ) {
            decision.action = ScalingActionKind::None;
            decision.reason = block.reason;
            decision.cooldown_remaining_s = Some(block.remaining_s);
            self.reset_errors(group.id).await;
            return Ok(decision);
        }

        // Step 10: idempotency key.
        let desired_capacity = status.current_instances + scaling_amount;
        let time_bucket = now.timestamp() / group.metric_period_s.max(60);
        let activity_key = format!("{}-{}-{}", group.id, desired_capacity, time_bucket);
        decision.activity_key = Some(activity_key.clone());

        // Step 11: execute, or record a dry run.
        let (activity_status, execution_result) = if group.dry_run {
            (
                ActivityStatus::DryRun,
                ExecutionResult {
                    status: ExecutionStatus::DryRun,
                    message: Some(format!("would set desired capacity to {desired_capacity}")),
                    response_blob: None,
                },
            )
        } else {
            match self.asg.modify_capacity(&group.asg_id, desired_capacity).await {
                Ok(()) => (
                    ActivityStatus::Success,
                    ExecutionResult {
                        status: ExecutionStatus::Success,
                        message: Some(format!("set desired capacity to {desired_capacity}")),
                        response_blob: None,
                    },
                ),
                Err(err) => {
                    self.increment_errors(group, &err, now).await;
                    decision.error = Some(err.to_string());
                    (
                        ActivityStatus::Error,
                        ExecutionResult {
                            status: ExecutionStatus::Error,
                            message: Some(err.to_string()),
                            response_blob: None,
                        },
                    )
                }
            }
        };
        decision.execution_result = Some(execution_result.clone());

        // Step 12: record. Activity first, then state, so a crash between
        // the two leaves the idempotency key already claimed rather than
        // silently re-attempting the same change.
        let outcome = self
            .state
            .record_activity(NewScalingActivity {
                resource_group_id: group.id,
                activity_key,
                action,
                status: activity_status,
                eval_qps: Some(current_qps),
                eval_capacity: Some(status.current_instances),
                target_qps: Some(group.target_qps_per_instance),
                response_blob: serde_json::json!({ "desired_capacity": desired_capacity }),
            })
            .await?;

        if matches!(outcome, ActivityOutcome::Duplicate) {
            decision.reason = DecisionReason::DuplicateActivity;
        }

        if activity_status != ActivityStatus::Error {
            self.reset_errors(group.id).await;
        }

        // Cooldown only advances on a successful resize, matching the
        // original's `update_cooldown_state` call sites (only reached from
        // the success branch of `_execute_scale_up`/`_execute_scale_down`).
        // A failed write or a dry-run must not push the deadline forward,
        // or a persistently failing group would suppress its own retries.
        let new_cooldown = if activity_status == ActivityStatus::Success {
            match action {
                ScalingActionKind::ScaleUp => Some(now + chrono::Duration::seconds(group.scale_up_cooldown_s)),
                ScalingActionKind::ScaleDown => Some(now + chrono::Duration::seconds(group.scale_down_cooldown_s)),
                ScalingActionKind::None => None,
            }
        } else {
            None
        };
        self.state
            .upsert_state(
                group.id,
                StateUpdate {
                    last_evaluated_at: Some(now),
                    cooldown_until: new_cooldown.map(Some),
                    latest_qps: Some(Some(current_qps)),
                    latest_capacity: Some(Some(desired_capacity)),
                    ..Default::default()
                },
            )
            .await?;

        info!(action = %decision.action, reason = %decision.reason, desired_capacity, "evaluation complete");
        Ok(decision)
    }

    async fn touch_runtime(&self, group_id: i64, qps: f64, capacity: i64, now: DateTime<Utc>) {
        let _ = self
            .state
            .upsert_state(
                group_id,
                StateUpdate {
                    last_evaluated_at: Some(now),
                    latest_qps: Some(Some(qps)),
                    latest_capacity: Some(Some(capacity)),
                    ..Default::default()
                },
            )
            .await;
    }

    async fn reset_errors(&self, group_id: i64) {
        let _ = self.state.reset_consecutive_errors(group_id).await;
    }

    /// Records a soft per-group failure: increments the consecutive-error
    /// counter and, once it reaches the configured threshold, opens the
    /// circuit for `reset_timeout_s`.
    async fn increment_errors(&self, group: &ResourceGroup, err: &AscError, now: DateTime<Utc>) {
        self.record_failure(group, err, now).await;
    }

    async fn record_failure(&self, group: &ResourceGroup, err: &AscError, now: DateTime<Utc>) {
        let count = match self.state.increment_consecutive_errors(group.id).await {
            Ok(count) => count,
            Err(state_err) => {
                warn!(error = %state_err, "failed to record consecutive error count");
                return;
            }
        };

        let _ = self
            .state
            .record_error(asc_common::NewErrorRecord {
                resource_group_id: Some(group.id),
                source: "asc-engine".to_string(),
                message: err.to_string(),
                context_blob: serde_json::json!({ "asg_id": group.asg_id }),
            })
            .await;

        if count >= self.circuit_breaker.failure_threshold as i64 {
            let circuit_open_until = now + chrono::Duration::seconds(self.circuit_breaker.reset_timeout_s);
            warn!(group_id = group.id, consecutive_errors = count, "opening circuit breaker");
            let _ = self
                .state
                .upsert_state(
                    group.id,
                    StateUpdate {
                        circuit_open_until: Some(Some(circuit_open_until)),
                        ..Default::default()
                    },
                )
                .await;
        }
    }
}

/// Picks the most specific applicable reason for a classified action.
/// Clamp-aware: a clamp at the ASG boundary takes priority over a plain
/// "scaling" reason since it tells the caller why the computed optimal
/// differs from what pure QPS math would otherwise produce.
fn classify_reason(
    action: ScalingActionKind,
    clamped: Option<ClampDirection>,
    limited_by_safety: bool,
    dynamic: bool,
) -> DecisionReason {
    if action == ScalingActionKind::None {
        return match clamped {
            Some(ClampDirection::Min) => DecisionReason::AtAsgMinCapacity,
            Some(ClampDirection::Max) => DecisionReason::AtAsgMaxCapacity,
            None => DecisionReason::OptimalInstanceCountReached,
        };
    }

    if !dynamic {
        return match action {
            ScalingActionKind::ScaleUp => DecisionReason::QpsAboveThreshold,
            ScalingActionKind::ScaleDown => DecisionReason::QpsBelowThreshold,
            ScalingActionKind::None => unreachable!(),
        };
    }

    match (action, limited_by_safety) {
        (ScalingActionKind::ScaleUp, true) => DecisionReason::DynamicScalingLimitedScaleUp,
        (ScalingActionKind::ScaleUp, false) => DecisionReason::DynamicScalingScaleUp,
        (ScalingActionKind::ScaleDown, true) => DecisionReason::DynamicScalingLimitedScaleDown,
        (ScalingActionKind::ScaleDown, false) => DecisionReason::DynamicScalingScaleDown,
        (ScalingActionKind::None, _) => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asc_asg::InMemoryAsgFacade;
    use asc_common::{AsgLifecycleState, AsgStatus};
    use asc_metrics::InMemoryMetricsFacade;
    use asc_state::InMemoryStateRepository;

    fn group(id: i64, target: f64, dynamic: bool) -> ResourceGroup {
        ResourceGroup {
            id,
            lb_id: format!("lb-{id}"),
            asg_id: format!("asg-{id}"),
            region: "us-east-1".to_string(),
            target_qps_per_instance: target,
            scale_up_cooldown_s: 300,
            scale_down_cooldown_s: 600,
            general_cooldown_s: 180,
            metric_period_s: 300,
            max_scale_up_per_action: 0,
            max_scale_down_per_action: 0,
            enable_dynamic_scaling: dynamic,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.4,
            dry_run: false,
            enabled: true,
            alert_webhook_url: None,
        }
    }

    fn status(current: i64, min: i64, max: i64) -> AsgStatus {
        AsgStatus {
            min_instances: min,
            max_instances: max,
            desired_instances: current,
            current_instances: current,
            lifecycle_state: AsgLifecycleState::InService,
        }
    }

    fn engine(
        metrics: Arc<InMemoryMetricsFacade>,
        asg: Arc<InMemoryAsgFacade>,
        state: Arc<InMemoryStateRepository>,
    ) -> Engine {
        Engine::new(metrics, asg, state, CircuitBreakerConfig::default())
    }

    #[tokio::test]
    async fn scenario_1_basic_scale_up_executes_and_records() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);
        metrics.set(&g.lb_id, Some(240.0));
        asg.set_status(&g.asg_id, status(3, 1, 10));

        let e = engine(metrics, asg.clone(), state);
        let decision = e.evaluate(&g, Some(Some(240.0)), Utc::now()).await;

        assert_eq!(decision.action, ScalingActionKind::ScaleUp);
        assert_eq!(decision.scaling_amount, Some(2));
        assert_eq!(asg.modify_calls(), vec![(g.asg_id.clone(), 5)]);
    }

    #[tokio::test]
    async fn scenario_3_at_min_capacity_takes_no_action() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);
        asg.set_status(&g.asg_id, status(3, 3, 10));

        let e = engine(metrics, asg.clone(), state);
        let decision = e.evaluate(&g, Some(Some(30.0)), Utc::now()).await;

        assert_eq!(decision.action, ScalingActionKind::None);
        assert_eq!(decision.reason, DecisionReason::AtAsgMinCapacity);
        assert!(asg.modify_calls().is_empty());
    }

    #[tokio::test]
    async fn scenario_4_local_cooldown_blocks_with_matching_direction_reason() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);
        asg.set_status(&g.asg_id, status(2, 1, 10));
        let now = Utc::now();
        state
            .upsert_state(
                g.id,
                StateUpdate {
                    cooldown_until: Some(Some(now + chrono::Duration::seconds(120))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let e = engine(metrics, asg.clone(), state);
        let decision = e.evaluate(&g, Some(Some(400.0)), now).await;

        assert_eq!(decision.action, ScalingActionKind::None);
        assert_eq!(decision.reason, DecisionReason::CooldownScaleUp);
        assert!(decision.cooldown_remaining_s.unwrap() > 0);
        assert!(asg.modify_calls().is_empty());
    }

    #[tokio::test]
    async fn in_progress_activity_short_circuits_before_metrics() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);
        asg.set_activities(&g.asg_id, vec![asc_asg::test_activity(
            asc_common::AsgActivityType::ScaleOut,
            asc_common::AsgActivityStatus::Running,
        )]);

        let e = engine(metrics, asg, state);
        let decision = e.evaluate(&g, None, Utc::now()).await;

        assert_eq!(decision.reason, DecisionReason::ScalingInProgress);
    }

    #[tokio::test]
    async fn suspended_group_takes_no_action() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);
        state
            .upsert_state(g.id, StateUpdate { suspended: Some(true), ..Default::default() })
            .await
            .unwrap();

        let e = engine(metrics, asg, state);
        let decision = e.evaluate(&g, None, Utc::now()).await;

        assert_eq!(decision.reason, DecisionReason::Suspended);
    }

    #[tokio::test]
    async fn missing_metrics_reports_error_without_touching_consecutive_errors() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);

        let e = engine(metrics, asg, state.clone());
        let decision = e.evaluate(&g, Some(None), Utc::now()).await;

        assert_eq!(decision.reason, DecisionReason::MetricsUnavailable);
        assert!(decision.error.is_some());
        let runtime_state = state.get_state(g.id).await.unwrap();
        assert_eq!(runtime_state.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn repeated_asg_errors_open_the_circuit() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);
        let mut config = CircuitBreakerConfig::default();
        config.failure_threshold = 2;
        let e = Engine::new(metrics, asg.clone(), state.clone(), config);

        for _ in 0..2 {
            asg.fail_next_status();
            let _ = e.evaluate(&g, Some(Some(100.0)), Utc::now()).await;
        }

        let runtime_state = state.get_state(g.id).await.unwrap();
        assert!(runtime_state.is_circuit_open(Utc::now()));

        let decision = e.evaluate(&g, Some(Some(100.0)), Utc::now()).await;
        assert_eq!(decision.reason, DecisionReason::CircuitOpen);
    }

    #[tokio::test]
    async fn dry_run_records_without_calling_modify_capacity() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let mut g = group(1, 50.0, true);
        g.dry_run = true;
        asg.set_status(&g.asg_id, status(3, 1, 10));

        let e = engine(metrics, asg.clone(), state.clone());
        let decision = e.evaluate(&g, Some(Some(240.0)), Utc::now()).await;

        assert_eq!(decision.action, ScalingActionKind::ScaleUp);
        assert!(asg.modify_calls().is_empty());
        let recent = state.recent_activities(g.id, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, ActivityStatus::DryRun);
    }

    #[tokio::test]
    async fn duplicate_activity_key_is_reported_but_not_an_error() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);
        asg.set_status(&g.asg_id, status(3, 1, 10));
        let now = Utc::now();

        let e = engine(metrics, asg.clone(), state.clone());
        let first = e.evaluate(&g, Some(Some(240.0)), now).await;
        assert_eq!(first.action, ScalingActionKind::ScaleUp);

        // Same time bucket, same desired capacity derived again: the
        // activity_key collides even though cooldown now blocks the
        // actual second attempt. Exercise the repository path directly.
        let outcome = state
            .record_activity(NewScalingActivity {
                resource_group_id: g.id,
                activity_key: first.activity_key.clone().unwrap(),
                action: ScalingActionKind::ScaleUp,
                status: ActivityStatus::Success,
                eval_qps: Some(240.0),
                eval_capacity: Some(3),
                target_qps: Some(50.0),
                response_blob: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert_eq!(outcome, ActivityOutcome::Duplicate);
    }

    #[tokio::test]
    async fn failed_resize_does_not_extend_cooldown() {
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let g = group(1, 50.0, true);
        asg.set_status(&g.asg_id, status(3, 1, 10));
        asg.fail_next_modify();

        let e = engine(metrics, asg.clone(), state.clone());
        let decision = e.evaluate(&g, Some(Some(240.0)), Utc::now()).await;

        assert_eq!(decision.action, ScalingActionKind::ScaleUp);
        assert_eq!(decision.execution_result.unwrap().status, ExecutionStatus::Error);
        let runtime_state = state.get_state(g.id).await.unwrap();
        assert!(runtime_state.cooldown_until.is_none());
    }
}
