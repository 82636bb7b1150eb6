//! Backend wiring and the daemon's two modules.
//!
//! The batch worker and the alert evaluator are each wrapped in a
//! [`ModuleHandle`] and driven through [`DynPipeline`]. The
//! [`ModuleRegistry`] starts them worker first, stops them evaluator first,
//! and reports modules disabled in configuration. [`Backends`] opens the queue, store and
//! marker backends selected in `logsluice.toml` once, so every module and
//! subcommand shares the same handles.

pub mod alert;
pub mod worker;

use anyhow::Result;

use logsluice_core::config::{AlertConfig, LogsluiceConfig, QueueConfig, StoreConfig};
use logsluice_core::pipeline::{DynPipeline, HealthStatus};
use logsluice_core::{LogsluiceError, PipelineError};
use logsluice_ingest::{
    BulkResolver, DeadLetterSink, FallbackMarkerStore, IngestGateway, MarkerBackend,
    MemoryMarkerStore, MemoryQueue, MemoryStore, QueueBackend, RedisMarkerStore,
    RedisStreamQueue, SqliteStore, StoreBackend,
};

use crate::health::ModuleHealth;

/// Shared backend handles selected by configuration.
///
/// All handles are cheap to clone and point at the same underlying state.
#[derive(Clone)]
pub struct Backends {
    /// Log queue consumed by the batch worker.
    pub queue: QueueBackend,
    /// Dead-letter stream.
    pub dead_letters: QueueBackend,
    /// App registrations and log records.
    pub store: StoreBackend,
    /// Alert dedup markers.
    pub markers: MarkerBackend,
}

impl Backends {
    /// Open every backend named in the configuration.
    pub fn open(config: &LogsluiceConfig) -> Result<Self> {
        let (queue, dead_letters) = open_queues(&config.queue)?;
        let store = open_store(&config.store)?;
        let markers = open_markers(&config.alert, &config.queue)?;

        tracing::info!(
            queue = queue.kind(),
            store = store.kind(),
            markers = markers.kind(),
            "backends opened"
        );

        Ok(Self {
            queue,
            dead_letters,
            store,
            markers,
        })
    }

    /// Gateway that enqueues onto the log queue and falls back to the store.
    pub fn gateway(&self) -> IngestGateway<QueueBackend, StoreBackend> {
        IngestGateway::new(self.queue.clone(), BulkResolver::new(self.store.clone()))
    }

    /// Dead-letter sink over the dead-letter stream.
    pub fn dead_letter_sink(&self) -> DeadLetterSink<QueueBackend> {
        DeadLetterSink::new(self.dead_letters.clone())
    }
}

/// Open the log queue and the dead-letter stream.
///
/// With the redis backend both streams share one client.
pub fn open_queues(config: &QueueConfig) -> Result<(QueueBackend, QueueBackend)> {
    match config.backend.as_str() {
        "memory" => Ok((
            MemoryQueue::new(config.stream.clone()).into(),
            MemoryQueue::new(config.dead_letter_stream.clone()).into(),
        )),
        "redis" => {
            let queue = RedisStreamQueue::open(&config.redis_url, config.stream.clone())
                .map_err(|e| anyhow::anyhow!("failed to open redis queue: {}", e))?;
            let dead_letters = queue.with_stream(config.dead_letter_stream.clone());
            Ok((queue.into(), dead_letters.into()))
        }
        other => Err(anyhow::anyhow!("unsupported queue backend '{}'", other)),
    }
}

/// Open the log store.
pub fn open_store(config: &StoreConfig) -> Result<StoreBackend> {
    match config.backend.as_str() {
        "memory" => Ok(MemoryStore::new().into()),
        "sqlite" => {
            let store = SqliteStore::open(&config.sqlite_path).map_err(|e| {
                anyhow::anyhow!("failed to open sqlite store {}: {}", config.sqlite_path, e)
            })?;
            Ok(store.into())
        }
        other => Err(anyhow::anyhow!("unsupported store backend '{}'", other)),
    }
}

/// Open the alert marker store.
///
/// The redis marker store reuses the queue's redis URL and falls back to
/// process-local markers while redis is unreachable.
pub fn open_markers(alert: &AlertConfig, queue: &QueueConfig) -> Result<MarkerBackend> {
    match alert.marker_backend.as_str() {
        "memory" => Ok(MarkerBackend::Memory(MemoryMarkerStore::new())),
        "redis" => {
            let primary = RedisMarkerStore::open(&queue.redis_url)
                .map_err(|e| anyhow::anyhow!("failed to open redis marker store: {}", e))?;
            Ok(MarkerBackend::Redis(FallbackMarkerStore::new(primary)))
        }
        other => Err(anyhow::anyhow!("unsupported marker backend '{}'", other)),
    }
}

/// A long-running ingest component: the batch worker or the alert evaluator.
pub struct ModuleHandle {
    /// `worker::MODULE_NAME` or `alert::MODULE_NAME`.
    pub name: &'static str,
    /// Lifecycle of the wrapped worker or evaluator.
    pub pipeline: Box<dyn DynPipeline>,
}

impl ModuleHandle {
    /// Wrap a built worker or evaluator.
    pub fn new(name: &'static str, pipeline: Box<dyn DynPipeline>) -> Self {
        Self { name, pipeline }
    }

    /// Current health of the wrapped module.
    pub async fn health_check(&self) -> HealthStatus {
        self.pipeline.health_check().await
    }
}

/// The daemon's modules in start order, plus the names of modules turned
/// off in `logsluice.toml`.
///
/// The worker is registered before the evaluator, so the evaluator stops
/// first and the worker's unacknowledged entries stay pending for the
/// next consumer.
#[derive(Default)]
pub struct ModuleRegistry {
    running_order: Vec<ModuleHandle>,
    disabled: Vec<&'static str>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module built by `worker::init` or `alert::init`.
    pub fn register(&mut self, handle: ModuleHandle) {
        self.running_order.push(handle);
    }

    /// Record a module that configuration turned off. It is reported in
    /// health output but never started.
    pub fn register_disabled(&mut self, name: &'static str) {
        self.disabled.push(name);
    }

    /// Add the result of a module `init` under `name`.
    pub fn register_init(&mut self, name: &'static str, handle: Option<ModuleHandle>) {
        match handle {
            Some(handle) => self.register(handle),
            None => self.register_disabled(name),
        }
    }

    /// Start every module in order.
    ///
    /// When one fails, the modules already started are stopped again
    /// (newest first) and the start error is returned.
    pub async fn start_all(&mut self) -> Result<()> {
        for index in 0..self.running_order.len() {
            let handle = &mut self.running_order[index];
            tracing::info!(module = handle.name, "starting module");
            if let Err(e) = handle.pipeline.start().await {
                let name = handle.name;
                tracing::warn!(module = name, error = %e, "module failed to start, rolling back");
                for started in self.running_order[..index].iter_mut().rev() {
                    if let Err(stop_err) = started.pipeline.stop().await {
                        tracing::error!(
                            module = started.name,
                            error = %stop_err,
                            "rollback stop failed"
                        );
                    }
                }
                return Err(anyhow::anyhow!("failed to start module '{}': {}", name, e));
            }
        }
        Ok(())
    }

    /// Stop every module, evaluator before worker.
    ///
    /// A module that is not running is skipped. Other stop errors are
    /// collected and returned together after all modules were tried.
    pub async fn stop_all(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        for handle in self.running_order.iter_mut().rev() {
            match handle.pipeline.stop().await {
                Ok(()) => tracing::info!(module = handle.name, "module stopped"),
                Err(LogsluiceError::Pipeline(PipelineError::NotRunning)) => {
                    tracing::debug!(module = handle.name, "module was not running");
                }
                Err(e) => {
                    tracing::error!(module = handle.name, error = %e, "failed to stop module");
                    failures.push(format!("{}: {}", handle.name, e));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("errors stopping modules: {}", failures.join("; ")))
        }
    }

    /// Health of every module, registered ones first in start order.
    pub async fn health(&self) -> Vec<ModuleHealth> {
        let mut report = Vec::with_capacity(self.running_order.len() + self.disabled.len());
        for handle in &self.running_order {
            report.push(ModuleHealth {
                name: handle.name.to_owned(),
                enabled: true,
                status: handle.health_check().await,
            });
        }
        report.extend(self.disabled.iter().map(|name| ModuleHealth {
            name: (*name).to_owned(),
            enabled: false,
            status: HealthStatus::Healthy,
        }));
        report
    }

    /// Names of the modules that will run.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        self.running_order.iter().map(|h| h.name).collect()
    }

    /// Names of the modules turned off in configuration.
    pub fn disabled_names(&self) -> &[&'static str] {
        &self.disabled
    }
}
