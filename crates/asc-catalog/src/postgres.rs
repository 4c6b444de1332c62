//! Postgres-backed `CatalogRepository`.

use crate::CatalogRepository;
use asc_common::{AscError, ResourceGroup};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

pub struct PostgresCatalogRepository {
    pool: PgPool,
}

impl PostgresCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates `resource_groups` if absent. Called once at startup; the
    /// table is otherwise owned by whatever provisions tenants.
    pub async fn init_schema(&self) -> Result<(), AscError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resource_groups (
                id BIGSERIAL PRIMARY KEY,
                lb_id TEXT NOT NULL,
                asg_id TEXT NOT NULL,
                region TEXT NOT NULL,
                target_qps_per_instance DOUBLE PRECISION NOT NULL,
                scale_up_cooldown_s BIGINT NOT NULL DEFAULT 300,
                scale_down_cooldown_s BIGINT NOT NULL DEFAULT 600,
                general_cooldown_s BIGINT NOT NULL DEFAULT 180,
                metric_period_s BIGINT NOT NULL DEFAULT 300,
                max_scale_up_per_action BIGINT NOT NULL DEFAULT 0,
                max_scale_down_per_action BIGINT NOT NULL DEFAULT 0,
                enable_dynamic_scaling BOOLEAN NOT NULL DEFAULT TRUE,
                scale_up_threshold DOUBLE PRECISION NOT NULL DEFAULT 0.8,
                scale_down_threshold DOUBLE PRECISION NOT NULL DEFAULT 0.4,
                dry_run BOOLEAN NOT NULL DEFAULT FALSE,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                alert_webhook_url TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_resource_groups_enabled ON resource_groups(enabled);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AscError::Catalog(e.to_string()))?;

        Ok(())
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<ResourceGroup, AscError> {
        Ok(ResourceGroup {
            id: row.try_get("id").map_err(|e| AscError::Catalog(e.to_string()))?,
            lb_id: row.try_get("lb_id").map_err(|e| AscError::Catalog(e.to_string()))?,
            asg_id: row.try_get("asg_id").map_err(|e| AscError::Catalog(e.to_string()))?,
            region: row.try_get("region").map_err(|e| AscError::Catalog(e.to_string()))?,
            target_qps_per_instance: row
                .try_get("target_qps_per_instance")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            scale_up_cooldown_s: row
                .try_get("scale_up_cooldown_s")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            scale_down_cooldown_s: row
                .try_get("scale_down_cooldown_s")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            general_cooldown_s: row
                .try_get("general_cooldown_s")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            metric_period_s: row
                .try_get("metric_period_s")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            max_scale_up_per_action: row
                .try_get("max_scale_up_per_action")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            max_scale_down_per_action: row
                .try_get("max_scale_down_per_action")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            enable_dynamic_scaling: row
                .try_get("enable_dynamic_scaling")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            scale_up_threshold: row
                .try_get("scale_up_threshold")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            scale_down_threshold: row
                .try_get("scale_down_threshold")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
            dry_run: row.try_get("dry_run").map_err(|e| AscError::Catalog(e.to_string()))?,
            enabled: row.try_get("enabled").map_err(|e| AscError::Catalog(e.to_string()))?,
            alert_webhook_url: row
                .try_get("alert_webhook_url")
                .map_err(|e| AscError::Catalog(e.to_string()))?,
        })
    }
}

#[async_trait]
impl CatalogRepository for PostgresCatalogRepository {
    async fn list_enabled_groups(&self) -> Result<Vec<ResourceGroup>, AscError> {
        let rows = sqlx::query("SELECT * FROM resource_groups WHERE enabled = TRUE")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AscError::Catalog(e.to_string()))?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            groups.push(Self::parse_row(row)?);
        }

        tracing::debug!(count = groups.len(), "fetched enabled resource groups");
        Ok(groups)
    }

    async fn get_group(&self, id: i64) -> Result<Option<ResourceGroup>, AscError> {
        let row = sqlx::query("SELECT * FROM resource_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AscError::Catalog(e.to_string()))?;

        row.as_ref().map(Self::parse_row).transpose()
    }
}
