//! Catalog reader: fetches enabled resource group definitions.

mod postgres;

pub use postgres::PostgresCatalogRepository;

use asc_common::{AscError, ResourceGroup};
use async_trait::async_trait;

/// Read-only access to tenant scaling configuration. Implemented against
/// Postgres in production and an in-memory fake in tests.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Returns all resource groups with `enabled = true`.
    async fn list_enabled_groups(&self) -> Result<Vec<ResourceGroup>, AscError>;

    /// Returns a single resource group by id, enabled or not. Used by the
    /// `status`/`validation` event kinds to inspect a specific group.
    async fn get_group(&self, id: i64) -> Result<Option<ResourceGroup>, AscError>;
}

/// In-memory fake for unit and engine tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalogRepository {
    groups: Vec<ResourceGroup>,
}

impl InMemoryCatalogRepository {
    pub fn new(groups: Vec<ResourceGroup>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn list_enabled_groups(&self) -> Result<Vec<ResourceGroup>, AscError> {
        Ok(self.groups.iter().filter(|g| g.enabled).cloned().collect())
    }

    async fn get_group(&self, id: i64) -> Result<Option<ResourceGroup>, AscError> {
        Ok(self.groups.iter().find(|g| g.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: i64, enabled: bool) -> ResourceGroup {
        ResourceGroup {
            id,
            lb_id: format!("lb-{id}"),
            asg_id: format!("asg-{id}"),
            region: "us-east-1".into(),
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
            enabled,
            alert_webhook_url: None,
        }
    }

    #[tokio::test]
    async fn lists_only_enabled() {
        let repo = InMemoryCatalogRepository::new(vec![group(1, true), group(2, false)]);
        let groups = repo.list_enabled_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, 1);
    }

    #[tokio::test]
    async fn get_group_finds_disabled_too() {
        let repo = InMemoryCatalogRepository::new(vec![group(2, false)]);
        let found = repo.get_group(2).await.unwrap();
        assert!(found.is_some());
        assert!(repo.get_group(99).await.unwrap().is_none());
    }
}
