//! State store: per-group runtime state, the scaling activity log, and the
//! error log.

mod postgres;

pub use postgres::PostgresStateRepository;

use asc_common::{AscError, GroupRuntimeState, NewErrorRecord, NewScalingActivity, ScalingActivity, StateUpdate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of inserting a scaling activity. `Duplicate` means the unique
/// `(resource_group_id, activity_key)` constraint already held a row — a
/// benign, expected outcome under concurrent/retried invocations, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    Inserted(i64),
    Duplicate,
}

#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Returns the group's runtime state, or a fresh default if none has
    /// been recorded yet.
    async fn get_state(&self, group_id: i64) -> Result<GroupRuntimeState, AscError>;

    /// Applies a partial update, upserting a row if none exists. Mirrors
    /// the original's column allow-list semantics: fields left `None` in
    /// `update` are left untouched rather than overwritten.
    async fn upsert_state(&self, group_id: i64, update: StateUpdate) -> Result<(), AscError>;

    /// Atomically increments `consecutive_errors`, returning the new value.
    async fn increment_consecutive_errors(&self, group_id: i64) -> Result<i64, AscError>;

    /// Resets `consecutive_errors` to zero on a successful evaluation.
    async fn reset_consecutive_errors(&self, group_id: i64) -> Result<(), AscError>;

    async fn record_activity(&self, activity: NewScalingActivity) -> Result<ActivityOutcome, AscError>;

    async fn record_error(&self, error: NewErrorRecord) -> Result<(), AscError>;

    /// Most recent activities for a group, newest first, for the `status`
    /// event kind's aggregate view.
    async fn recent_activities(&self, group_id: i64, limit: i64) -> Result<Vec<ScalingActivity>, AscError>;
}

/// In-memory fake for engine/controller tests.
#[derive(Default)]
pub struct InMemoryStateRepository {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    states: HashMap<i64, GroupRuntimeState>,
    activities: Vec<ScalingActivity>,
    next_activity_id: i64,
    errors: Vec<asc_common::ErrorRecord>,
    next_error_id: i64,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn get_state(&self, group_id: i64) -> Result<GroupRuntimeState, AscError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.states.get(&group_id).cloned().unwrap_or(GroupRuntimeState {
            resource_group_id: group_id,
            ..Default::default()
        }))
    }

    async fn upsert_state(&self, group_id: i64, update: StateUpdate) -> Result<(), AscError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.states.entry(group_id).or_insert(GroupRuntimeState {
            resource_group_id: group_id,
            ..Default::default()
        });
        if let Some(v) = update.last_evaluated_at {
            entry.last_evaluated_at = Some(v);
        }
        if let Some(v) = update.cooldown_until {
            entry.cooldown_until = v;
        }
        if let Some(v) = update.consecutive_errors {
            entry.consecutive_errors = v;
        }
        if let Some(v) = update.circuit_open_until {
            entry.circuit_open_until = v;
        }
        if let Some(v) = update.suspended {
            entry.suspended = v;
        }
        if let Some(v) = update.latest_qps {
            entry.latest_qps = v;
        }
        if let Some(v) = update.latest_capacity {
            entry.latest_capacity = v;
        }
        Ok(())
    }

    async fn increment_consecutive_errors(&self, group_id: i64) -> Result<i64, AscError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.states.entry(group_id).or_insert(GroupRuntimeState {
            resource_group_id: group_id,
            ..Default::default()
        });
        entry.consecutive_errors += 1;
        Ok(entry.consecutive_errors)
    }

    async fn reset_consecutive_errors(&self, group_id: i64) -> Result<(), AscError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.states.get_mut(&group_id) {
            entry.consecutive_errors = 0;
        }
        Ok(())
    }

    async fn record_activity(&self, activity: NewScalingActivity) -> Result<ActivityOutcome, AscError> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner
            .activities
            .iter()
            .any(|a| a.resource_group_id == activity.resource_group_id && a.activity_key == activity.activity_key);
        if duplicate {
            return Ok(ActivityOutcome::Duplicate);
        }
        inner.next_activity_id += 1;
        let id = inner.next_activity_id;
        inner.activities.push(ScalingActivity {
            id,
            resource_group_id: activity.resource_group_id,
            activity_key: activity.activity_key,
            action: activity.action,
            status: activity.status,
            eval_qps: activity.eval_qps,
            eval_capacity: activity.eval_capacity,
            target_qps: activity.target_qps,
            response_blob: activity.response_blob,
            created_at: chrono::Utc::now(),
        });
        Ok(ActivityOutcome::Inserted(id))
    }

    async fn record_error(&self, error: NewErrorRecord) -> Result<(), AscError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_error_id += 1;
        let id = inner.next_error_id;
        inner.errors.push(asc_common::ErrorRecord {
            id,
            resource_group_id: error.resource_group_id,
            source: error.source,
            message: error.message,
            context_blob: error.context_blob,
            created_at: chrono::Utc::now(),
        });
        Ok(())
    }

    async fn recent_activities(&self, group_id: i64, limit: i64) -> Result<Vec<ScalingActivity>, AscError> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<_> = inner
            .activities
            .iter()
            .filter(|a| a.resource_group_id == group_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asc_common::{ActivityStatus, ScalingActionKind};

    fn activity(group_id: i64, key: &str) -> NewScalingActivity {
        NewScalingActivity {
            resource_group_id: group_id,
            activity_key: key.to_string(),
            action: ScalingActionKind::ScaleUp,
            status: ActivityStatus::Success,
            eval_qps: Some(120.0),
            eval_capacity: Some(3),
            target_qps: Some(50.0),
            response_blob: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn duplicate_activity_key_is_benign() {
        let repo = InMemoryStateRepository::new();
        let first = repo.record_activity(activity(1, "1-4-1700000000")).await.unwrap();
        assert!(matches!(first, ActivityOutcome::Inserted(_)));
        let second = repo.record_activity(activity(1, "1-4-1700000000")).await.unwrap();
        assert_eq!(second, ActivityOutcome::Duplicate);
    }

    #[tokio::test]
    async fn consecutive_errors_increment_and_reset() {
        let repo = InMemoryStateRepository::new();
        assert_eq!(repo.increment_consecutive_errors(1).await.unwrap(), 1);
        assert_eq!(repo.increment_consecutive_errors(1).await.unwrap(), 2);
        repo.reset_consecutive_errors(1).await.unwrap();
        let state = repo.get_state(1).await.unwrap();
        assert_eq!(state.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn recent_activities_orders_newest_first() {
        let repo = InMemoryStateRepository::new();
        repo.record_activity(activity(1, "a")).await.unwrap();
        repo.record_activity(activity(1, "b")).await.unwrap();
        let recent = repo.recent_activities(1, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].activity_key, "b");
    }
}
