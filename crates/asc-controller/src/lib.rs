//! Tick orchestration: loads enabled resource groups, takes one batched
//! metrics snapshot, then fans out per-group evaluation across a bounded
//! worker pool with a whole-tick deadline.

use asc_asg::AsgFacade;
use asc_catalog::CatalogRepository;
use asc_common::{AscError, Decision, DecisionReason};
use asc_config::{CircuitBreakerConfig, ControllerConfig};
use asc_engine::Engine;
use asc_metrics::MetricsFacade;
use asc_state::StateRepository;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Aggregate outcome of one tick across all enabled groups.
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub per_group: Vec<Decision>,
    pub groups_considered: usize,
    pub groups_acted_on: usize,
    pub groups_errored: usize,
    pub groups_timed_out: usize,
}

impl TickSummary {
    fn empty() -> Self {
        Self {
            per_group: Vec::new(),
            groups_considered: 0,
            groups_acted_on: 0,
            groups_errored: 0,
            groups_timed_out: 0,
        }
    }

    fn from_decisions(per_group: Vec<Decision>) -> Self {
        let groups_considered = per_group.len();
        let groups_acted_on = per_group
            .iter()
            .filter(|d| d.action != asc_common::ScalingActionKind::None)
            .count();
        let groups_errored = per_group.iter().filter(|d| d.error.is_some()).count();
        let groups_timed_out = per_group.iter().filter(|d| d.reason == DecisionReason::Timeout).count();
        Self {
            per_group,
            groups_considered,
            groups_acted_on,
            groups_errored,
            groups_timed_out,
        }
    }
}

pub struct Controller {
    catalog: Arc<dyn CatalogRepository>,
    engine: Arc<Engine>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        metrics: Arc<dyn MetricsFacade>,
        asg: Arc<dyn AsgFacade>,
        state: Arc<dyn StateRepository>,
        config: ControllerConfig,
        circuit_breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            catalog,
            engine: Arc::new(Engine::new(metrics.clone(), asg, state, circuit_breaker)),
            config,
        }
    }

    /// Runs one tick: load groups, one batched metrics call, bounded
    /// concurrent fan-out over `evaluate`, deadline-cancelled.
    pub async fn run_tick(&self, metrics: Arc<dyn MetricsFacade>, now: DateTime<Utc>) -> Result<TickSummary, AscError> {
        let groups = self.catalog.list_enabled_groups().await?;
        if groups.is_empty() {
            info!("no enabled resource groups, skipping tick");
            return Ok(TickSummary::empty());
        }

        let lb_ids: Vec<String> = {
            let mut seen = std::collections::HashSet::new();
            groups
                .iter()
                .map(|g| g.lb_id.clone())
                .filter(|id| seen.insert(id.clone()))
                .collect()
        };
        let window_s = groups.iter().map(|g| g.metric_period_s).max().unwrap_or(300);

        let qps_by_lb: HashMap<String, Option<f64>> = match metrics.batch_average_qps(&lb_ids, window_s).await {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, "batched metrics call failed, each group will fall back individually");
                HashMap::new()
            }
        };

        let deadline = tokio::time::Duration::from_millis(self.config.tick_deadline_ms);
        let decisions = self.evaluate_all(groups, qps_by_lb, now, deadline).await;
        Ok(TickSummary::from_decisions(decisions))
    }

    /// Fans a tick out across a bounded worker pool. Each group's task races
    /// the shared deadline independently: a slow group is recorded as
    /// `status=error, reason=timeout` and its in-flight task aborted, while
    /// groups that already finished (or finish before their own turn is
    /// checked) keep their real decision. This keeps one stuck group from
    /// sinking the whole tick's result.
    async fn evaluate_all(
        &self,
        groups: Vec<asc_common::ResourceGroup>,
        qps_by_lb: HashMap<String, Option<f64>>,
        now: DateTime<Utc>,
        deadline: tokio::time::Duration,
    ) -> Vec<Decision> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut tasks = Vec::with_capacity(groups.len());

        for group in groups {
            let group_id = group.id;
            let semaphore = semaphore.clone();
            let engine = self.engine.clone();
            let prefetched = qps_by_lb.get(&group.lb_id).copied();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                engine.evaluate(&group, prefetched, now).await
            });
            let abort_handle = handle.abort_handle();
            tasks.push((group_id, abort_handle, handle));
        }

        let mut decisions = Vec::with_capacity(tasks.len());
        for (group_id, abort_handle, handle) in tasks {
            match tokio::time::timeout_at(deadline_at, handle).await {
                Ok(Ok(decision)) => decisions.push(decision),
                Ok(Err(join_err)) => {
                    warn!(group_id, error = %join_err, "group evaluation task panicked");
                    decisions.push(
                        Decision::none(group_id, DecisionReason::EvaluationError)
                            .with_error(format!("evaluation task panicked: {join_err}")),
                    );
                }
                Err(_) => {
                    abort_handle.abort();
                    warn!(group_id, "group evaluation exceeded tick deadline, cancelling");
                    decisions.push(Decision::none(group_id, DecisionReason::Timeout));
                }
            }
        }
        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asc_asg::InMemoryAsgFacade;
    use asc_catalog::InMemoryCatalogRepository;
    use asc_common::{AsgLifecycleState, AsgStatus, ResourceGroup};
    use asc_metrics::InMemoryMetricsFacade;
    use asc_state::InMemoryStateRepository;

    fn group(id: i64) -> ResourceGroup {
        ResourceGroup {
            id,
            lb_id: format!("lb-{id}"),
            asg_id: format!("asg-{id}"),
            region: "us-east-1".to_string(),
            target_qps_per_instance: 50.0,
            scale_up_cooldown_s: 300,
            scale_down_cooldown_s: 600,
            general_cooldown_s: 180,
            metric_period_s: 300,
            max_scale_up_per_action: 0,
            max_scale_down_per_action: 0,
            enable_dynamic_scaling: true,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.4,
            dry_run: false,
            enabled: true,
            alert_webhook_url: None,
        }
    }

    #[tokio::test]
    async fn empty_catalog_short_circuits() {
        let catalog = Arc::new(InMemoryCatalogRepository::new(vec![]));
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        let controller = Controller::new(
            catalog,
            metrics.clone(),
            asg,
            state,
            ControllerConfig::default(),
            CircuitBreakerConfig::default(),
        );

        let summary = controller.run_tick(metrics, Utc::now()).await.unwrap();
        assert_eq!(summary.groups_considered, 0);
    }

    #[tokio::test]
    async fn fans_out_across_multiple_groups_concurrently() {
        let groups = vec![group(1), group(2), group(3)];
        let catalog = Arc::new(InMemoryCatalogRepository::new(groups.clone()));
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());

        for g in &groups {
            metrics.set(&g.lb_id, Some(240.0));
            asg.set_status(
                &g.asg_id,
                AsgStatus {
                    min_instances: 1,
                    max_instances: 10,
                    desired_instances: 3,
                    current_instances: 3,
                    lifecycle_state: AsgLifecycleState::InService,
                },
            );
        }

        let mut config = ControllerConfig::default();
        config.max_concurrency = 2;
        let controller = Controller::new(catalog, metrics.clone(), asg, state, config, CircuitBreakerConfig::default());

        let summary = controller.run_tick(metrics, Utc::now()).await.unwrap();
        assert_eq!(summary.groups_considered, 3);
        assert_eq!(summary.groups_acted_on, 3);
    }

    #[tokio::test]
    async fn deadline_exceeded_is_recorded_per_group_not_as_a_tick_error() {
        let groups = vec![group(1)];
        let catalog = Arc::new(InMemoryCatalogRepository::new(groups.clone()));
        let metrics = Arc::new(InMemoryMetricsFacade::new());
        let asg = Arc::new(InMemoryAsgFacade::new());
        let state = Arc::new(InMemoryStateRepository::new());
        metrics.set("lb-1", Some(100.0));

        let mut config = ControllerConfig::default();
        config.tick_deadline_ms = 0;
        let controller = Controller::new(catalog, metrics.clone(), asg, state, config, CircuitBreakerConfig::default());

        let summary = controller.run_tick(metrics, Utc::now()).await.unwrap();
        assert_eq!(summary.groups_considered, 1);
        assert_eq!(summary.groups_timed_out, 1);
        assert_eq!(summary.per_group[0].reason, DecisionReason::Timeout);
    }
}
