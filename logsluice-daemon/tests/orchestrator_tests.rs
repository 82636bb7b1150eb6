//! Orchestrator integration tests.
//!
//! Full flow over in-memory backends: build -> start -> ingest -> health -> shutdown.

use std::time::Duration;

use serde_json::json;
use serial_test::serial;

use logsluice_core::config::LogsluiceConfig;
use logsluice_core::types::LogFilter;
use logsluice_daemon::orchestrator::{Orchestrator, remove_pid_file, write_pid_file};
use logsluice_ingest::{IngestPath, LogStore};

fn memory_config(pid_file: &str) -> LogsluiceConfig {
    let toml_str = format!(
        r#"
[general]
pid_file = "{pid_file}"

[queue]
backend = "memory"
block_ms = 50

[store]
backend = "memory"

[worker]
idle_sleep_ms = 5

[alert]
interval_secs = 1
marker_backend = "memory"

[[alert.rules]]
key = "ERROR"
threshold = 2
window_secs = 60
"#
    );
    LogsluiceConfig::parse(&toml_str).expect("failed to parse memory config")
}

async fn wait_for_logs<S: LogStore>(store: &S, expected: u64) {
    for _ in 0..300 {
        if store.count_logs(&LogFilter::default()).await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store never reached {expected} records");
}

#[tokio::test]
async fn test_build_registers_enabled_modules() {
    let orchestrator = Orchestrator::build_from_config(memory_config(""))
        .await
        .expect("orchestrator should build");

    let health = orchestrator.health().await;
    let names: Vec<&str> = health.modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["batch-worker", "alert-evaluator"]);
    // not started yet
    assert!(health.status.is_unhealthy());
}

#[tokio::test]
async fn test_disabled_modules_are_reported_but_not_started() {
    let mut config = memory_config("");
    config.worker.enabled = false;
    config.alert.enabled = false;

    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    let health = orchestrator.health().await;
    assert_eq!(health.modules.len(), 2);
    assert!(health.modules.iter().all(|m| !m.enabled));

    orchestrator.start().await.unwrap();
    assert!(orchestrator.health().await.status.is_healthy());
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = memory_config("");
    config.queue.dead_letter_stream = config.queue.stream.clone();
    assert!(Orchestrator::build_from_config(config).await.is_err());
}

#[tokio::test]
async fn test_start_ingest_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("run").join("logsluice.pid");
    let config = memory_config(&pid_path.display().to_string());

    let mut orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    orchestrator.start().await.expect("modules should start");
    assert!(pid_path.exists(), "PID file should be written on start");
    assert!(orchestrator.start().await.is_err(), "double start must fail");

    let receipt = orchestrator
        .gateway()
        .submit(vec![
            json!({"level": "ERROR", "message": "a", "service": "api", "app": "demo"}),
            json!({"level": "ERROR", "message": "b", "service": "api", "app": "demo"}),
            json!({"level": "INFO", "message": "c", "service": "api", "app": "other"}),
        ])
        .await
        .unwrap();
    assert_eq!(receipt.path, IngestPath::Queued);

    let store = orchestrator.backends().store.clone();
    wait_for_logs(&store, 3).await;
    assert_eq!(store.list_apps(0, 10).await.unwrap().len(), 2);

    let health = orchestrator.health().await;
    assert!(health.status.is_healthy(), "got {:?}", health.status);

    orchestrator.shutdown().await.expect("clean shutdown");
    assert!(!pid_path.exists(), "PID file should be removed on shutdown");

    let health = orchestrator.health().await;
    assert!(health.status.is_unhealthy());
}

#[tokio::test]
async fn test_existing_pid_file_blocks_start() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("logsluice.pid");
    std::fs::write(&pid_path, "4242\n").unwrap();

    let mut orchestrator =
        Orchestrator::build_from_config(memory_config(&pid_path.display().to_string()))
            .await
            .unwrap();
    let err = orchestrator.start().await.unwrap_err();
    assert!(err.to_string().contains("4242"));

    // the other instance's PID file is left untouched
    assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "4242\n");
}

#[test]
fn test_pid_file_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("nested").join("daemon.pid");

    write_pid_file(&pid_path).expect("should create parent and write PID");
    let content = std::fs::read_to_string(&pid_path).unwrap();
    assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&pid_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    assert!(write_pid_file(&pid_path).is_err(), "duplicate must be refused");

    remove_pid_file(&pid_path);
    assert!(!pid_path.exists());
    // removing again only logs a warning
    remove_pid_file(&pid_path);
}

#[tokio::test]
#[serial]
async fn test_env_override_selects_memory_backends() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"[general]\npid_file = \"\"\n").unwrap();

    // SAFETY: env vars are only touched from serial tests.
    unsafe {
        std::env::set_var("LOGSLUICE_QUEUE_BACKEND", "memory");
        std::env::set_var("LOGSLUICE_STORE_BACKEND", "memory");
        std::env::set_var("LOGSLUICE_ALERT_MARKER_BACKEND", "memory");
    }
    let result = Orchestrator::build(file.path()).await;
    unsafe {
        std::env::remove_var("LOGSLUICE_QUEUE_BACKEND");
        std::env::remove_var("LOGSLUICE_STORE_BACKEND");
        std::env::remove_var("LOGSLUICE_ALERT_MARKER_BACKEND");
    }

    let orchestrator = result.expect("orchestrator should build from env");
    assert_eq!(orchestrator.backends().queue.kind(), "memory");
    assert_eq!(orchestrator.backends().store.kind(), "memory");
    assert_eq!(orchestrator.backends().markers.kind(), "memory");
}
