//! Alert evaluator module initialization.
//!
//! Builds the `AlertEvaluator` from `LogsluiceConfig.alert`. Notifications
//! are delivered on the orchestrator's channel and logged there.

use anyhow::Result;
use tokio::sync::mpsc;

use logsluice_core::config::LogsluiceConfig;
use logsluice_ingest::{AlertEvaluatorBuilder, AlertNotification, EvaluatorConfig};

use super::{Backends, ModuleHandle};

/// Module name used in logs and health reports.
pub const MODULE_NAME: &str = "alert-evaluator";

/// Initialize the alert evaluator module.
///
/// Returns `None` if alerting is disabled in configuration.
pub fn init(
    config: &LogsluiceConfig,
    backends: &Backends,
    notification_tx: mpsc::Sender<AlertNotification>,
) -> Result<Option<ModuleHandle>> {
    if !config.alert.enabled {
        tracing::info!("alert evaluator disabled in configuration");
        return Ok(None);
    }

    let evaluator_config = EvaluatorConfig::from_core(&config.alert);
    tracing::info!(
        rules = evaluator_config.rules.len(),
        interval_secs = config.alert.interval_secs,
        markers = backends.markers.kind(),
        "initializing alert evaluator"
    );

    let (evaluator, _) = AlertEvaluatorBuilder::new()
        .config(evaluator_config)
        .store(backends.store.clone())
        .markers(backends.markers.clone())
        .notification_sender(notification_tx)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build alert evaluator: {}", e))?;

    Ok(Some(ModuleHandle::new(MODULE_NAME, Box::new(evaluator))))
}
