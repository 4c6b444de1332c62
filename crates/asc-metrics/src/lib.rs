//! Metrics facade: a single batched average-QPS call per tick across all
//! distinct load balancer ids.

mod http;

pub use http::HttpMetricsFacade;

use asc_common::AscError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Chooses the CloudMonitor-style aggregation period for a given averaging
/// window. Mirrors `cloudmonitor_client.py`'s period selection: short
/// windows get fine-grained buckets, long windows fall back to 5-minute
/// buckets.
pub fn period_for_window(window_s: i64) -> &'static str {
    if window_s <= 30 {
        "15s"
    } else if window_s <= 120 {
        "30s"
    } else if window_s <= 600 {
        "1m"
    } else {
        "5m"
    }
}

#[async_trait]
pub trait MetricsFacade: Send + Sync {
    /// Returns the average QPS over `window_s` seconds for each requested
    /// load balancer id, in one round trip. A missing/`None` entry means
    /// the backend returned no data points for that id — not an error.
    async fn batch_average_qps(
        &self,
        lb_ids: &[String],
        window_s: i64,
    ) -> Result<HashMap<String, Option<f64>>, AscError>;
}

/// In-memory fake for engine/controller tests.
#[derive(Default)]
pub struct InMemoryMetricsFacade {
    values: Mutex<HashMap<String, Option<f64>>>,
    fail_next: Mutex<bool>,
}

impl InMemoryMetricsFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, lb_id: impl Into<String>, qps: Option<f64>) {
        self.values.lock().unwrap().insert(lb_id.into(), qps);
    }

    pub fn fail_next_call(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl MetricsFacade for InMemoryMetricsFacade {
    async fn batch_average_qps(
        &self,
        lb_ids: &[String],
        _window_s: i64,
    ) -> Result<HashMap<String, Option<f64>>, AscError> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(AscError::MetricsUnavailable("simulated failure".to_string()));
        }
        let values = self.values.lock().unwrap();
        Ok(lb_ids
            .iter()
            .map(|id| (id.clone(), values.get(id).copied().flatten()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_buckets_match_policy() {
        assert_eq!(period_for_window(10), "15s");
        assert_eq!(period_for_window(30), "15s");
        assert_eq!(period_for_window(31), "30s");
        assert_eq!(period_for_window(120), "30s");
        assert_eq!(period_for_window(121), "1m");
        assert_eq!(period_for_window(600), "1m");
        assert_eq!(period_for_window(601), "5m");
        assert_eq!(period_for_window(3600), "5m");
    }

    #[tokio::test]
    async fn in_memory_facade_reports_missing_as_none() {
        let facade = InMemoryMetricsFacade::new();
        facade.set("lb-1", Some(42.0));
        let result = facade
            .batch_average_qps(&["lb-1".to_string(), "lb-2".to_string()], 300)
            .await
            .unwrap();
        assert_eq!(result.get("lb-1").copied().flatten(), Some(42.0));
        assert_eq!(result.get("lb-2").copied().flatten(), None);
    }

    #[tokio::test]
    async fn in_memory_facade_can_simulate_failure() {
        let facade = InMemoryMetricsFacade::new();
        facade.fail_next_call();
        let result = facade.batch_average_qps(&["lb-1".to_string()], 300).await;
        assert!(result.is_err());
    }
}
