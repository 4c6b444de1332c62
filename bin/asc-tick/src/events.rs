//! The three invocation event kinds (spec.md §6): `scaling_evaluation`,
//! `status`, and `validation`. Each produces the same envelope shape so a
//! FaaS caller (or `asc-dev`) can treat them uniformly.

use crate::alerts;
use crate::AppContext;
use asc_asg::AsgFacade;
use asc_catalog::CatalogRepository;
use asc_common::Decision;
use asc_metrics::MetricsFacade;
use asc_state::StateRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct InvocationResult {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    pub result: serde_json::Value,
    pub execution_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn dispatch(ctx: &AppContext, event_kind: &str, group_id: Option<i64>, now: DateTime<Utc>) -> InvocationResult {
    let execution_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let (status_code, result, error) = match event_kind {
        "status" => status_event(ctx, group_id).await,
        "validation" => validation_event(ctx).await,
        _ => scaling_evaluation_event(ctx, now).await,
    };

    InvocationResult {
        status_code,
        execution_id,
        timestamp: now,
        result,
        execution_time_ms: started.elapsed().as_millis() as i64,
        error,
    }
}

/// `scaling_evaluation`: runs one full tick, then fires alert webhooks for
/// any group whose decision actually changed capacity (or tried to and
/// failed). Alerting is fire-and-forget per spec.md §7: a webhook failure
/// is logged, never fatal to the tick's result.
async fn scaling_evaluation_event(ctx: &AppContext, now: DateTime<Utc>) -> (u16, serde_json::Value, Option<String>) {
    match ctx.controller.run_tick(ctx.metrics.clone(), now).await {
        Ok(summary) => {
            for decision in &summary.per_group {
                if should_alert(decision) {
                    let group_webhook = ctx
                        .catalog
                        .get_group(decision.resource_group_id)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|g| g.alert_webhook_url);
                    alerts::notify(&ctx.config.alerts, group_webhook.as_deref(), decision).await;
                }
            }
            (
                200,
                json!({
                    "action": "scaling_evaluation",
                    "status": "completed",
                    "message": format!(
                        "evaluated {} group(s), acted on {}, {} errored, {} timed out",
                        summary.groups_considered, summary.groups_acted_on, summary.groups_errored, summary.groups_timed_out
                    ),
                    "results": summary.per_group,
                }),
                None,
            )
        }
        Err(err) if err.is_tick_fatal() => {
            error!(error = %err, "tick-fatal error, aborting");
            (
                500,
                json!({ "action": "scaling_evaluation", "status": "failed", "message": err.to_string(), "results": [] }),
                Some(err.to_string()),
            )
        }
        Err(err) => {
            warn!(error = %err, "tick did not complete cleanly");
            (
                200,
                json!({ "action": "scaling_evaluation", "status": "partial", "message": err.to_string(), "results": [] }),
                Some(err.to_string()),
            )
        }
    }
}

fn should_alert(decision: &Decision) -> bool {
    use asc_common::ScalingActionKind;
    decision.action != ScalingActionKind::None || decision.error.is_some()
}

/// `status`: read-only aggregate view combining cooldown state, cached
/// metrics, and recent activity history — no ASG write, no metrics call
/// beyond what's already cached in runtime state.
async fn status_event(ctx: &AppContext, group_id: Option<i64>) -> (u16, serde_json::Value, Option<String>) {
    let groups = match group_id {
        Some(id) => match ctx.catalog.get_group(id).await {
            Ok(Some(group)) => vec![group],
            Ok(None) => {
                return (
                    200,
                    json!({ "action": "status", "status": "not_found", "message": format!("no resource group {id}"), "results": [] }),
                    None,
                )
            }
            Err(err) => return (500, json!({ "action": "status", "status": "failed" }), Some(err.to_string())),
        },
        None => match ctx.catalog.list_enabled_groups().await {
            Ok(groups) => groups,
            Err(err) => return (500, json!({ "action": "status", "status": "failed" }), Some(err.to_string())),
        },
    };

    let mut statuses = Vec::with_capacity(groups.len());
    for group in &groups {
        let runtime_state = ctx.state.get_state(group.id).await.unwrap_or_default();
        let recent = ctx.state.recent_activities(group.id, 10).await.unwrap_or_default();
        statuses.push(json!({
            "resource_group_id": group.id,
            "asg_id": group.asg_id,
            "lb_id": group.lb_id,
            "enabled": group.enabled,
            "dry_run": group.dry_run,
            "suspended": runtime_state.suspended,
            "cooldown_until": runtime_state.cooldown_until,
            "circuit_open_until": runtime_state.circuit_open_until,
            "consecutive_errors": runtime_state.consecutive_errors,
            "latest_qps": runtime_state.latest_qps,
            "latest_capacity": runtime_state.latest_capacity,
            "last_evaluated_at": runtime_state.last_evaluated_at,
            "recent_activities": recent,
        }));
    }

    (
        200,
        json!({ "action": "status", "status": "completed", "message": format!("{} group(s)", statuses.len()), "results": statuses }),
        None,
    )
}

/// `validation`: config is already validated at load time; this also
/// probes that the catalog is reachable and that a representative
/// metrics/ASG read succeeds, without scaling anything.
async fn validation_event(ctx: &AppContext) -> (u16, serde_json::Value, Option<String>) {
    let mut checks = Vec::new();
    let mut all_ok = true;

    let groups = match ctx.catalog.list_enabled_groups().await {
        Ok(groups) => {
            checks.push(json!({ "check": "catalog_reachable", "ok": true, "enabled_groups": groups.len() }));
            groups
        }
        Err(err) => {
            all_ok = false;
            checks.push(json!({ "check": "catalog_reachable", "ok": false, "error": err.to_string() }));
            Vec::new()
        }
    };

    for group in &groups {
        if let Err(msg) = group.validate() {
            all_ok = false;
            checks.push(json!({ "check": "group_config", "resource_group_id": group.id, "ok": false, "error": msg }));
        }
    }
    if !groups.is_empty() {
        checks.push(json!({ "check": "group_config", "ok": all_ok, "groups_checked": groups.len() }));
    }

    if let Some(sample) = groups.first() {
        match ctx.metrics.batch_average_qps(std::slice::from_ref(&sample.lb_id), sample.metric_period_s).await {
            Ok(_) => checks.push(json!({ "check": "metrics_connectivity", "ok": true, "lb_id": sample.lb_id })),
            Err(err) => {
                all_ok = false;
                checks.push(json!({ "check": "metrics_connectivity", "ok": false, "error": err.to_string() }));
            }
        }

        match ctx.asg.get_status(&sample.asg_id).await {
            Ok(_) => checks.push(json!({ "check": "asg_connectivity", "ok": true, "asg_id": sample.asg_id })),
            Err(err) => {
                all_ok = false;
                checks.push(json!({ "check": "asg_connectivity", "ok": false, "error": err.to_string() }));
            }
        }
    }

    (
        if all_ok { 200 } else { 500 },
        json!({
            "action": "validation",
            "status": if all_ok { "valid" } else { "invalid" },
            "message": format!("{} check(s) run", checks.len()),
            "results": checks,
        }),
        if all_ok { None } else { Some("one or more validation checks failed".to_string()) },
    )
}
