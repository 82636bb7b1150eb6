//! Module orchestration -- backend wiring, lifecycle, and shutdown.
//!
//! The [`Orchestrator`] is the central coordinator of `logsluice-daemon`.
//! It validates configuration, opens the shared backends, builds the enabled
//! modules, manages startup/shutdown ordering, and runs the main event loop.
//!
//! # Startup Order
//!
//! 1. Batch Worker (drains its pending entries, then consumes new ones)
//! 2. Alert Evaluator (reads persisted records)
//!
//! # Shutdown Order (reverse of startup)
//!
//! 1. Alert Evaluator
//! 2. Batch Worker (unacknowledged entries stay pending for the next consumer)

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use logsluice_core::config::LogsluiceConfig;
use logsluice_ingest::{AlertNotification, IngestGateway, QueueBackend, StoreBackend};

use crate::health::{DaemonHealth, aggregate_status, log_health};
use crate::metrics_server;
use crate::modules::{self, Backends, ModuleRegistry};

/// Capacity of the alert notification channel.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Interval between health reports in the main loop.
const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: LogsluiceConfig,
    /// Shared queue, store and marker handles.
    backends: Backends,
    /// Registered modules (ordered for start/stop).
    modules: ModuleRegistry,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
    /// Alert notification receiver, taken by the logger task on start.
    notification_rx: Option<mpsc::Receiver<AlertNotification>>,
    /// Background tasks spawned by `start`.
    tasks: Vec<JoinHandle<()>>,
    /// Whether `start` succeeded and `shutdown` has not run yet.
    running: bool,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - Any backend or enabled module fails to initialize
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogsluiceConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: LogsluiceConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before module initialization
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let backends = Backends::open(&config)?;
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(16);

        let mut registry = ModuleRegistry::new();
        registry.register_init(
            modules::worker::MODULE_NAME,
            modules::worker::init(&config, &backends)?,
        );
        registry.register_init(
            modules::alert::MODULE_NAME,
            modules::alert::init(&config, &backends, notification_tx)?,
        );

        tracing::info!(
            enabled = ?registry.enabled_names(),
            disabled = ?registry.disabled_names(),
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            record_daemon_metrics(registry.enabled_names().len());
        }

        Ok(Self {
            config,
            backends,
            modules: registry,
            shutdown_tx,
            start_time: Instant::now(),
            notification_rx: Some(notification_rx),
            tasks: Vec::new(),
            running: false,
        })
    }

    /// Start all enabled modules and enter the main event loop.
    ///
    /// This method blocks until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        let mut signals = ShutdownSignals::install()?;
        self.start().await?;

        tracing::info!("entering main event loop");
        let mut health_tick = tokio::time::interval(HEALTH_REPORT_INTERVAL);
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let signal = loop {
            tokio::select! {
                signal = signals.recv() => break signal,
                _ = health_tick.tick() => log_health(&self.health().await),
            }
        };
        tracing::info!(signal = signal, "shutdown signal received");

        self.shutdown().await
    }

    /// Write the PID file, start all modules, and spawn background tasks.
    ///
    /// If any module fails to start, already-started modules are stopped
    /// and the PID file is removed before the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(anyhow::anyhow!("orchestrator is already running"));
        }

        if let Some(path) = self.pid_path() {
            write_pid_file(path)?;
        }

        tracing::info!("starting all modules");
        if let Err(e) = self.modules.start_all().await {
            if let Some(path) = self.pid_path() {
                remove_pid_file(path);
            }
            return Err(e);
        }

        if let Some(notification_rx) = self.notification_rx.take() {
            let log_enabled = self.config.alert.notify_methods.iter().any(|m| m == "log");
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(spawn_notification_logger(
                notification_rx,
                log_enabled,
                shutdown_rx,
            ));
        }

        if self.config.metrics.enabled {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(spawn_uptime_updater(self.start_time, shutdown_rx));
        }

        self.running = true;
        Ok(())
    }

    /// Signal background tasks, stop all modules, and remove the PID file.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;

        tracing::info!("stopping all modules");
        let result = self.modules.stop_all().await;

        // after the evaluator stops, so queued notifications are still logged
        tracing::info!("broadcasting shutdown signal to all tasks");
        let _ = self.shutdown_tx.send(());

        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        if let Some(path) = self.pid_path() {
            remove_pid_file(path);
        }

        result
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let modules = self.modules.health().await;

        DaemonHealth {
            status: aggregate_status(&modules),
            uptime_secs: self.start_time.elapsed().as_secs(),
            modules,
        }
    }

    /// Gateway sharing this daemon's queue and store.
    pub fn gateway(&self) -> IngestGateway<QueueBackend, StoreBackend> {
        self.backends.gateway()
    }

    /// Shared backend handles.
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogsluiceConfig {
        &self.config
    }

    fn pid_path(&self) -> Option<&Path> {
        let pid_file = &self.config.general.pid_file;
        (!pid_file.is_empty()).then(|| Path::new(pid_file.as_str()))
    }
}

/// Installed SIGTERM and SIGINT handlers.
struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Install handlers before any module starts, so an early signal is not lost.
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;
        Ok(Self { sigterm, sigint })
    }

    /// Wait for the next signal and return its name.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

/// Create `path` holding this process id.
///
/// Fails when the file already exists, so two daemons sharing a PID file
/// cannot both run. The parent directory is created `0o700` and the file
/// `0o600`; anything other than a freshly created regular file is removed
/// and rejected.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_private_dir(dir)?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                let holder = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
                anyhow::anyhow!(
                    "PID file {} already exists with PID: {}. Is another instance running?",
                    path.display(),
                    holder.trim()
                )
            } else {
                anyhow::anyhow!("failed to create PID file {}: {}", path.display(), e)
            }
        })?;

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    let pid = std::process::id();
    writeln!(file, "{pid}")?;
    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .mode(0o700)
        .recursive(true)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Remove the PID file. A failure is logged, never returned.
pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file"),
    }
}

/// Spawn a background task that delivers alert notifications.
///
/// With the `log` notify method each notification is logged at warn level;
/// otherwise notifications are drained so the evaluator never blocks.
fn spawn_notification_logger(
    mut notification_rx: mpsc::Receiver<AlertNotification>,
    log_enabled: bool,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = notification_rx.recv() => {
                    match received {
                        Some(notification) if log_enabled => {
                            tracing::warn!(
                                rule = %notification.rule_key,
                                count = notification.count,
                                threshold = notification.threshold,
                                window_secs = notification.window_secs,
                                fired_at = %notification.fired_at,
                                "{}",
                                notification.message
                            );
                        }
                        Some(notification) => {
                            tracing::debug!(
                                rule = %notification.rule_key,
                                "alert notification dropped (no notify method)"
                            );
                        }
                        None => {
                            tracing::debug!("notification channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("notification logger shutting down");
                    break;
                }
            }
        }
    })
}

/// Record daemon-level metrics (build info).
fn record_daemon_metrics(module_count: usize) {
    use logsluice_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    tracing::debug!(
        module_count = module_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    use logsluice_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
