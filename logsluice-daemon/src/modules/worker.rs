//! Batch worker module initialization.
//!
//! Converts `LogsluiceConfig.queue` and `LogsluiceConfig.worker` into an
//! `IngestConfig`, builds the `BatchWorker` over the shared backends, and
//! wraps it in a `ModuleHandle`.
//!
//! ```text
//! queue --entries--> BatchWorker --records--> store
//!                         └--failures--> dead-letter stream
//! ```

use anyhow::Result;

use logsluice_core::config::LogsluiceConfig;
use logsluice_ingest::{BatchWorkerBuilder, IngestConfig};

use super::{Backends, ModuleHandle};

/// Module name used in logs and health reports.
pub const MODULE_NAME: &str = "batch-worker";

/// Initialize the batch worker module.
///
/// # Returns
///
/// * `Ok(Some(ModuleHandle))` - Worker initialized and ready to start
/// * `Ok(None)` - Module disabled in configuration
/// * `Err(_)` - Initialization failed
pub fn init(config: &LogsluiceConfig, backends: &Backends) -> Result<Option<ModuleHandle>> {
    if !config.worker.enabled {
        tracing::info!("batch worker disabled in configuration");
        return Ok(None);
    }

    let ingest_config = IngestConfig::from_core(&config.queue, &config.worker)
        .map_err(|e| anyhow::anyhow!("invalid batch worker config: {}", e))?;

    tracing::info!(
        stream = %ingest_config.stream,
        group = %ingest_config.group,
        consumer = %ingest_config.consumer,
        "initializing batch worker"
    );

    let (worker, _) = BatchWorkerBuilder::new()
        .config(ingest_config)
        .queue(backends.queue.clone())
        .dead_letters(backends.dead_letter_sink())
        .store(backends.store.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build batch worker: {}", e))?;

    Ok(Some(ModuleHandle::new(MODULE_NAME, Box::new(worker))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> LogsluiceConfig {
        let mut config = LogsluiceConfig::default();
        config.queue.backend = "memory".to_owned();
        config.store.backend = "memory".to_owned();
        config.alert.marker_backend = "memory".to_owned();
        config
    }

    #[tokio::test]
    async fn disabled_worker_is_skipped() {
        let mut config = memory_config();
        config.worker.enabled = false;
        let backends = Backends::open(&config).unwrap();
        assert!(init(&config, &backends).unwrap().is_none());
    }

    #[tokio::test]
    async fn enabled_worker_is_registered() {
        let config = memory_config();
        let backends = Backends::open(&config).unwrap();
        let handle = init(&config, &backends).unwrap().unwrap();
        assert_eq!(handle.name, MODULE_NAME);
        assert!(handle.health_check().await.is_unhealthy());
    }
}
