//! Optional alert webhook side channel (spec.md §7, §9 "alert webhook" /
//! original `index.py`'s `send_alert`): fired fire-and-forget whenever a
//! tick produces a decision other than a quiet `none`. A webhook failure
//! is logged and never affects the tick's own result.

use asc_common::Decision;
use asc_config::AlertConfig;
use tracing::{debug, warn};

/// `group_webhook_url` is the resource group's own override, if any; the
/// global `config.default_webhook_url` is used when the group has none.
pub async fn notify(config: &AlertConfig, group_webhook_url: Option<&str>, decision: &Decision) {
    let url = match group_webhook_url.or(config.default_webhook_url.as_deref()) {
        Some(url) => url,
        None => {
            debug!(resource_group_id = decision.resource_group_id, "no alert webhook configured, skipping");
            return;
        }
    };

    let client = reqwest::Client::new();
    let request = client
        .post(url)
        .timeout(std::time::Duration::from_millis(config.timeout_ms))
        .header("Content-Type", "application/json")
        .json(decision);

    match request.send().await {
        Ok(response) if response.status().is_success() => {
            debug!(resource_group_id = decision.resource_group_id, "alert webhook delivered");
        }
        Ok(response) => {
            warn!(resource_group_id = decision.resource_group_id, status = %response.status(), "alert webhook returned non-success");
        }
        Err(err) => {
            warn!(resource_group_id = decision.resource_group_id, error = %err, "alert webhook delivery failed");
        }
    }
}
