//! logsluice.toml 통합 설정 테스트
//!
//! - logsluice.toml.example 파싱 테스트
//! - 파일 로딩과 환경변수 우선순위 테스트
//! - 잘못된 형식 에러 테스트

use std::io::Write;

use logsluice_core::config::{LogsluiceConfig, MAX_BATCH_SIZE};
use logsluice_core::error::{ConfigError, LogsluiceError};
use serial_test::serial;

const EXAMPLE: &str = include_str!("../../../logsluice.toml.example");

#[test]
fn example_config_parses_and_validates() {
    let config = LogsluiceConfig::parse(EXAMPLE).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_builtin_defaults() {
    let from_file = LogsluiceConfig::parse(EXAMPLE).expect("should parse");
    let defaults = LogsluiceConfig::default();

    assert_eq!(from_file.general.log_level, defaults.general.log_level);
    assert_eq!(from_file.general.pid_file, defaults.general.pid_file);
    assert_eq!(from_file.queue.backend, defaults.queue.backend);
    assert_eq!(from_file.queue.stream, defaults.queue.stream);
    assert_eq!(from_file.queue.group, defaults.queue.group);
    assert_eq!(
        from_file.queue.dead_letter_stream,
        defaults.queue.dead_letter_stream
    );
    assert_eq!(from_file.queue.batch_size, defaults.queue.batch_size);
    assert_eq!(from_file.queue.block_ms, defaults.queue.block_ms);
    assert_eq!(from_file.store.sqlite_path, defaults.store.sqlite_path);
    assert_eq!(
        from_file.worker.error_backoff_ms,
        defaults.worker.error_backoff_ms
    );
    assert_eq!(from_file.alert.rules, defaults.alert.rules);
    assert_eq!(from_file.metrics.port, defaults.metrics.port);
}

#[tokio::test]
#[serial]
async fn load_applies_env_over_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[queue]\nstream = \"from-file\"\ngroup = \"g1\"").expect("write");

    // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
    unsafe { std::env::set_var("LOGSLUICE_QUEUE_STREAM", "from-env") };
    let result = LogsluiceConfig::load(file.path()).await;
    unsafe { std::env::remove_var("LOGSLUICE_QUEUE_STREAM") };

    let config = result.expect("load should succeed");
    assert_eq!(config.queue.stream, "from-env");
    assert_eq!(config.queue.group, "g1");
}

#[tokio::test]
#[serial]
async fn load_rejects_invalid_env_value_after_override() {
    let file = tempfile::NamedTempFile::new().expect("tempfile");

    // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
    unsafe {
        std::env::set_var(
            "LOGSLUICE_QUEUE_BATCH_SIZE",
            (MAX_BATCH_SIZE + 1).to_string(),
        )
    };
    let result = LogsluiceConfig::load(file.path()).await;
    unsafe { std::env::remove_var("LOGSLUICE_QUEUE_BATCH_SIZE") };

    let err = result.expect_err("oversized batch should be rejected");
    assert!(matches!(
        err,
        LogsluiceError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "queue.batch_size"
    ));
}

#[tokio::test]
async fn from_file_reports_parse_failure() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[queue\nstream = ").expect("write");

    let err = LogsluiceConfig::from_file(file.path())
        .await
        .expect_err("broken toml should fail");
    assert!(matches!(
        err,
        LogsluiceError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn unknown_backend_is_rejected() {
    let config = LogsluiceConfig::parse("[store]\nbackend = \"postgres\"").expect("should parse");
    let err = config.validate().expect_err("postgres is not a store backend");
    assert!(err.to_string().contains("store.backend"));
}
