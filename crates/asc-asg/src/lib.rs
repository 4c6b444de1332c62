//! ASG facade: scaling group status, recent activity history, and capacity
//! modification against the cloud autoscaling API.

mod http;

pub use http::HttpAsgFacade;

use asc_common::{AsgActivity, AsgActivityType, AscError, AsgStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait AsgFacade: Send + Sync {
    async fn get_status(&self, asg_id: &str) -> Result<AsgStatus, AscError>;

    /// True if the ASG's most recent activity is `Init` or `Running`
    /// (§4.2 step 1: never act while a change is already underway).
    async fn is_activity_in_progress(&self, asg_id: &str) -> Result<bool, AscError>;

    /// Recent activities, newest first, used for the authoritative
    /// cooldown cross-check (§4.3).
    async fn list_recent_activities(&self, asg_id: &str, limit: u32) -> Result<Vec<AsgActivity>, AscError>;

    async fn modify_capacity(&self, asg_id: &str, desired_capacity: i64) -> Result<(), AscError>;
}

/// In-memory fake for engine/controller tests.
#[derive(Default)]
pub struct InMemoryAsgFacade {
    statuses: Mutex<HashMap<String, AsgStatus>>,
    activities: Mutex<HashMap<String, Vec<AsgActivity>>>,
    modify_calls: Mutex<Vec<(String, i64)>>,
    fail_status: Mutex<bool>,
    fail_modify: Mutex<bool>,
}

impl InMemoryAsgFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, asg_id: impl Into<String>, status: AsgStatus) {
        self.statuses.lock().unwrap().insert(asg_id.into(), status);
    }

    pub fn set_activities(&self, asg_id: impl Into<String>, activities: Vec<AsgActivity>) {
        self.activities.lock().unwrap().insert(asg_id.into(), activities);
    }

    pub fn fail_next_status(&self) {
        *self.fail_status.lock().unwrap() = true;
    }

    pub fn fail_next_modify(&self) {
        *self.fail_modify.lock().unwrap() = true;
    }

    pub fn modify_calls(&self) -> Vec<(String, i64)> {
        self.modify_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AsgFacade for InMemoryAsgFacade {
    async fn get_status(&self, asg_id: &str) -> Result<AsgStatus, AscError> {
        if std::mem::take(&mut *self.fail_status.lock().unwrap()) {
            return Err(AscError::AsgRead("simulated failure".to_string()));
        }
        self.statuses
            .lock()
            .unwrap()
            .get(asg_id)
            .copied()
            .ok_or_else(|| AscError::AsgRead(format!("unknown asg {asg_id}")))
    }

    async fn is_activity_in_progress(&self, asg_id: &str) -> Result<bool, AscError> {
        let activities = self.activities.lock().unwrap();
        Ok(activities
            .get(asg_id)
            .and_then(|acts| acts.first())
            .is_some_and(|a| a.status_code.is_in_progress()))
    }

    async fn list_recent_activities(&self, asg_id: &str, limit: u32) -> Result<Vec<AsgActivity>, AscError> {
        let activities = self.activities.lock().unwrap();
        let mut result = activities.get(asg_id).cloned().unwrap_or_default();
        result.truncate(limit as usize);
        Ok(result)
    }

    async fn modify_capacity(&self, asg_id: &str, desired_capacity: i64) -> Result<(), AscError> {
        if std::mem::take(&mut *self.fail_modify.lock().unwrap()) {
            return Err(AscError::AsgWrite("simulated failure".to_string()));
        }
        self.modify_calls.lock().unwrap().push((asg_id.to_string(), desired_capacity));
        if let Some(status) = self.statuses.lock().unwrap().get_mut(asg_id) {
            status.desired_instances = desired_capacity;
            status.current_instances = desired_capacity;
        }
        Ok(())
    }
}

/// Builds a synthetic activity for test fixtures.
pub fn test_activity(activity_type: AsgActivityType, status: asc_common::AsgActivityStatus) -> AsgActivity {
    AsgActivity {
        activity_type,
        status_code: status,
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asc_common::{AsgActivityStatus, AsgLifecycleState};

    fn status(current: i64, min: i64, max: i64) -> AsgStatus {
        AsgStatus {
            min_instances: min,
            max_instances: max,
            desired_instances: current,
            current_instances: current,
            lifecycle_state: AsgLifecycleState::InService,
        }
    }

    #[tokio::test]
    async fn in_progress_detection_looks_at_most_recent_activity() {
        let facade = InMemoryAsgFacade::new();
        facade.set_activities(
            "asg-1",
            vec![test_activity(AsgActivityType::ScaleOut, AsgActivityStatus::Running)],
        );
        assert!(facade.is_activity_in_progress("asg-1").await.unwrap());
    }

    #[tokio::test]
    async fn modify_capacity_records_calls_and_updates_status() {
        let facade = InMemoryAsgFacade::new();
        facade.set_status("asg-1", status(2, 1, 10));
        facade.modify_capacity("asg-1", 4).await.unwrap();
        assert_eq!(facade.modify_calls(), vec![("asg-1".to_string(), 4)]);
        assert_eq!(facade.get_status("asg-1").await.unwrap().current_instances, 4);
    }
}
