//! Postgres-backed `StateRepository`.

use crate::{ActivityOutcome, StateRepository};
use asc_common::{
    ActivityStatus, AscError, GroupRuntimeState, NewErrorRecord, NewScalingActivity, ScalingActionKind,
    ScalingActivity, StateUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

pub struct PostgresStateRepository {
    pool: PgPool,
}

impl PostgresStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), AscError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resource_group_state (
                resource_group_id BIGINT PRIMARY KEY,
                last_evaluated_at TIMESTAMPTZ,
                cooldown_until TIMESTAMPTZ,
                consecutive_errors BIGINT NOT NULL DEFAULT 0,
                circuit_open_until TIMESTAMPTZ,
                suspended BOOLEAN NOT NULL DEFAULT FALSE,
                latest_qps DOUBLE PRECISION,
                latest_capacity BIGINT
            );

            CREATE TABLE IF NOT EXISTS scaling_activities (
                id BIGSERIAL PRIMARY KEY,
                resource_group_id BIGINT NOT NULL,
                activity_key TEXT NOT NULL,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                eval_qps DOUBLE PRECISION,
                eval_capacity BIGINT,
                target_qps DOUBLE PRECISION,
                response JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (resource_group_id, activity_key)
            );
            CREATE INDEX IF NOT EXISTS idx_scaling_activities_group_created
                ON scaling_activities(resource_group_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS errors (
                id BIGSERIAL PRIMARY KEY,
                resource_group_id BIGINT,
                source TEXT NOT NULL,
                message TEXT NOT NULL,
                context JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AscError::StateStore(e.to_string()))?;

        Ok(())
    }
}

fn parse_action(s: &str) -> ScalingActionKind {
    match s {
        "scale_up" => ScalingActionKind::ScaleUp,
        "scale_down" => ScalingActionKind::ScaleDown,
        _ => ScalingActionKind::None,
    }
}

fn parse_status(s: &str) -> ActivityStatus {
    match s {
        "error" => ActivityStatus::Error,
        "dry_run" => ActivityStatus::DryRun,
        "skipped" => ActivityStatus::Skipped,
        _ => ActivityStatus::Success,
    }
}

#[async_trait]
impl StateRepository for PostgresStateRepository {
    async fn get_state(&self, group_id: i64) -> Result<GroupRuntimeState, AscError> {
        let row = sqlx::query("SELECT * FROM resource_group_state WHERE resource_group_id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AscError::StateStore(e.to_string()))?;

        let Some(row) = row else {
            return Ok(GroupRuntimeState {
                resource_group_id: group_id,
                ..Default::default()
            });
        };

        Ok(GroupRuntimeState {
            resource_group_id: group_id,
            last_evaluated_at: row.try_get("last_evaluated_at").ok(),
            cooldown_until: row.try_get("cooldown_until").ok(),
            consecutive_errors: row.try_get("consecutive_errors").unwrap_or(0),
            circuit_open_until: row.try_get("circuit_open_until").ok(),
            suspended: row.try_get("suspended").unwrap_or(false),
            latest_qps: row.try_get("latest_qps").ok(),
            latest_capacity: row.try_get("latest_capacity").ok(),
        })
    }

    /// Only the columns present in `update` are written, mirroring the
    /// original's `valid_columns` allow-list: an upsert whose `SET` clause
    /// only touches fields the caller actually supplied.
    async fn upsert_state(&self, group_id: i64, update: StateUpdate) -> Result<(), AscError> {
        let mut columns: Vec<&'static str> = Vec::new();
        if update.last_evaluated_at.is_some() {
            columns.push("last_evaluated_at");
        }
        if update.cooldown_until.is_some() {
            columns.push("cooldown_until");
        }
        if update.consecutive_errors.is_some() {
            columns.push("consecutive_errors");
        }
        if update.circuit_open_until.is_some() {
            columns.push("circuit_open_until");
        }
        if update.suspended.is_some() {
            columns.push("suspended");
        }
        if update.latest_qps.is_some() {
            columns.push("latest_qps");
        }
        if update.latest_capacity.is_some() {
            columns.push("latest_capacity");
        }

        if columns.is_empty() {
            tracing::warn!(group_id, "upsert_state called with no fields set");
            return Ok(());
        }

        let placeholders: Vec<String> = (2..=columns.len() + 1).map(|i| format!("${i}")).collect();
        let set_clause: Vec<String> = columns.iter().map(|c| format!("{c} = EXCLUDED.{c}")).collect();

        let query = format!(
            "INSERT INTO resource_group_state (resource_group_id, {cols}) VALUES ($1, {ph}) \
             ON CONFLICT (resource_group_id) DO UPDATE SET {set}",
            cols = columns.join(", "),
            ph = placeholders.join(", "),
            set = set_clause.join(", "),
        );

        let mut q = sqlx::query(&query).bind(group_id);
        for col in &columns {
            q = match *col {
                "last_evaluated_at" => q.bind(update.last_evaluated_at),
                "cooldown_until" => q.bind(update.cooldown_until.flatten()),
                "consecutive_errors" => q.bind(update.consecutive_errors),
                "circuit_open_until" => q.bind(update.circuit_open_until.flatten()),
                "suspended" => q.bind(update.suspended),
                "latest_qps" => q.bind(update.latest_qps.flatten()),
                "latest_capacity" => q.bind(update.latest_capacity.flatten()),
                _ => unreachable!(),
            };
        }

        q.execute(&self.pool)
            .await
            .map_err(|e| AscError::StateStore(e.to_string()))?;

        Ok(())
    }

    async fn increment_consecutive_errors(&self, group_id: i64) -> Result<i64, AscError> {
        let row = sqlx::query(
            "INSERT INTO resource_group_state (resource_group_id, consecutive_errors) VALUES ($1, 1) \
             ON CONFLICT (resource_group_id) DO UPDATE \
             SET consecutive_errors = resource_group_state.consecutive_errors + 1 \
             RETURNING consecutive_errors",
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AscError::StateStore(e.to_string()))?;

        row.try_get("consecutive_errors")
            .map_err(|e| AscError::StateStore(e.to_string()))
    }

    async fn reset_consecutive_errors(&self, group_id: i64) -> Result<(), AscError> {
        sqlx::query(
            "INSERT INTO resource_group_state (resource_group_id, consecutive_errors) VALUES ($1, 0) \
             ON CONFLICT (resource_group_id) DO UPDATE SET consecutive_errors = 0",
        )
        .bind(group_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AscError::StateStore(e.to_string()))?;

        Ok(())
    }

    async fn record_activity(&self, activity: NewScalingActivity) -> Result<ActivityOutcome, AscError> {
        let row = sqlx::query(
            "INSERT INTO scaling_activities \
             (resource_group_id, activity_key, action, status, eval_qps, eval_capacity, target_qps, response) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (resource_group_id, activity_key) DO NOTHING \
             RETURNING id",
        )
        .bind(activity.resource_group_id)
        .bind(&activity.activity_key)
        .bind(activity.action.to_string())
        .bind(match activity.status {
            ActivityStatus::Success => "success",
            ActivityStatus::Error => "error",
            ActivityStatus::DryRun => "dry_run",
            ActivityStatus::Skipped => "skipped",
        })
        .bind(activity.eval_qps)
        .bind(activity.eval_capacity)
        .bind(activity.target_qps)
        .bind(&activity.response_blob)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AscError::StateStore(e.to_string()))?;

        match row {
            Some(row) => {
                let id: i64 = row.try_get("id").map_err(|e| AscError::StateStore(e.to_string()))?;
                Ok(ActivityOutcome::Inserted(id))
            }
            None => Ok(ActivityOutcome::Duplicate),
        }
    }

    async fn record_error(&self, error: NewErrorRecord) -> Result<(), AscError> {
        sqlx::query(
            "INSERT INTO errors (resource_group_id, source, message, context) VALUES ($1, $2, $3, $4)",
        )
        .bind(error.resource_group_id)
        .bind(&error.source)
        .bind(&error.message)
        .bind(&error.context_blob)
        .execute(&self.pool)
        .await
        .map_err(|e| AscError::StateStore(e.to_string()))?;

        Ok(())
    }

    async fn recent_activities(&self, group_id: i64, limit: i64) -> Result<Vec<ScalingActivity>, AscError> {
        let rows = sqlx::query(
            "SELECT * FROM scaling_activities WHERE resource_group_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(group_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AscError::StateStore(e.to_string()))?;

        let mut activities = Vec::with_capacity(rows.len());
        for row in &rows {
            let action_str: String = row.try_get("action").map_err(|e| AscError::StateStore(e.to_string()))?;
            let status_str: String = row.try_get("status").map_err(|e| AscError::StateStore(e.to_string()))?;
            let created_at: DateTime<Utc> =
                row.try_get("created_at").map_err(|e| AscError::StateStore(e.to_string()))?;
            activities.push(ScalingActivity {
                id: row.try_get("id").map_err(|e| AscError::StateStore(e.to_string()))?,
                resource_group_id: group_id,
                activity_key: row
                    .try_get("activity_key")
                    .map_err(|e| AscError::StateStore(e.to_string()))?,
                action: parse_action(&action_str),
                status: parse_status(&status_str),
                eval_qps: row.try_get("eval_qps").ok(),
                eval_capacity: row.try_get("eval_capacity").ok(),
                target_qps: row.try_get("target_qps").ok(),
                response_blob: row.try_get("response").unwrap_or(serde_json::json!({})),
                created_at,
            });
        }

        Ok(activities)
    }
}
