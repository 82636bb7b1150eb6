//! 설정 관리 -- logsluice.toml 파싱 및 런타임 설정
//!
//! [`LogsluiceConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGSLUICE_QUEUE_STREAM=logs:stream` 형식)
//! 3. 설정 파일 (`logsluice.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logsluice_core::error::LogsluiceError> {
//! use logsluice_core::config::LogsluiceConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogsluiceConfig::load("logsluice.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogsluiceConfig::parse("[queue]\nbatch_size = 100")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogsluiceError};

/// 배치 크기 상한
pub const MAX_BATCH_SIZE: usize = 100_000;

/// 블로킹 읽기 타임아웃 상한 (ms)
pub const MAX_BLOCK_MS: u64 = 60_000;

/// 유휴 pending 엔트리 회수 기준 기본값 (ms)
pub const DEFAULT_CLAIM_IDLE_MS: u64 = 60_000;

/// logsluice 통합 설정
///
/// `logsluice.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 컴포넌트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsluiceConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 큐 설정
    #[serde(default)]
    pub queue: QueueConfig,
    /// 저장소 설정
    #[serde(default)]
    pub store: StoreConfig,
    /// 배치 워커 설정
    #[serde(default)]
    pub worker: WorkerConfig,
    /// 알림 평가기 설정
    #[serde(default)]
    pub alert: AlertConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LogsluiceConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogsluiceError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogsluiceError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogsluiceError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogsluiceError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogsluiceError> {
        toml::from_str(toml_str).map_err(|e| {
            LogsluiceError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGSLUICE_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGSLUICE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGSLUICE_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "LOGSLUICE_GENERAL_PID_FILE");

        // Queue
        override_string(&mut self.queue.backend, "LOGSLUICE_QUEUE_BACKEND");
        override_string(&mut self.queue.redis_url, "LOGSLUICE_QUEUE_REDIS_URL");
        override_string(&mut self.queue.stream, "LOGSLUICE_QUEUE_STREAM");
        override_string(&mut self.queue.group, "LOGSLUICE_QUEUE_GROUP");
        override_string(&mut self.queue.consumer, "LOGSLUICE_QUEUE_CONSUMER");
        override_string(
            &mut self.queue.dead_letter_stream,
            "LOGSLUICE_QUEUE_DEAD_LETTER_STREAM",
        );
        override_usize(&mut self.queue.batch_size, "LOGSLUICE_QUEUE_BATCH_SIZE");
        override_u64(&mut self.queue.block_ms, "LOGSLUICE_QUEUE_BLOCK_MS");
        override_string(
            &mut self.queue.start_position,
            "LOGSLUICE_QUEUE_START_POSITION",
        );
        override_u64(&mut self.queue.claim_idle_ms, "LOGSLUICE_QUEUE_CLAIM_IDLE_MS");

        // Store
        override_string(&mut self.store.backend, "LOGSLUICE_STORE_BACKEND");
        override_string(&mut self.store.sqlite_path, "LOGSLUICE_STORE_SQLITE_PATH");

        // Worker
        override_bool(&mut self.worker.enabled, "LOGSLUICE_WORKER_ENABLED");
        override_u64(
            &mut self.worker.idle_sleep_ms,
            "LOGSLUICE_WORKER_IDLE_SLEEP_MS",
        );
        override_u64(
            &mut self.worker.error_backoff_ms,
            "LOGSLUICE_WORKER_ERROR_BACKOFF_MS",
        );

        // Alert
        override_bool(&mut self.alert.enabled, "LOGSLUICE_ALERT_ENABLED");
        override_u64(
            &mut self.alert.interval_secs,
            "LOGSLUICE_ALERT_INTERVAL_SECS",
        );
        override_string(
            &mut self.alert.marker_backend,
            "LOGSLUICE_ALERT_MARKER_BACKEND",
        );
        override_csv(
            &mut self.alert.notify_methods,
            "LOGSLUICE_ALERT_NOTIFY_METHODS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGSLUICE_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "LOGSLUICE_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "LOGSLUICE_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogsluiceError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        one_of(
            "general.log_level",
            &self.general.log_level,
            &valid_levels,
        )?;
        one_of("general.log_format", &self.general.log_format, &["json", "pretty"])?;

        self.queue.validate()?;

        one_of("store.backend", &self.store.backend, &["memory", "sqlite"])?;
        if self.store.backend == "sqlite" && self.store.sqlite_path.is_empty() {
            return Err(invalid(
                "store.sqlite_path",
                "must not be empty when store.backend is sqlite",
            ));
        }

        if self.alert.enabled {
            self.alert.validate()?;
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be non-zero"));
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/logsluice.pid".to_owned(),
        }
    }
}

/// 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 백엔드 (memory, redis)
    pub backend: String,
    /// Redis 연결 문자열
    pub redis_url: String,
    /// 로그 스트림 이름
    pub stream: String,
    /// 컨슈머 그룹 이름
    pub group: String,
    /// 컨슈머 이름 (빈 문자열이면 `consumer-<8 hex>` 자동 생성)
    pub consumer: String,
    /// 데드레터 스트림 이름
    pub dead_letter_stream: String,
    /// 한 번에 읽는 최대 엔트리 수
    pub batch_size: usize,
    /// 새 엔트리 대기 타임아웃 (ms)
    pub block_ms: u64,
    /// 그룹 생성 시 시작 위치 (new, beginning)
    pub start_position: String,
    /// 다른 컨슈머의 pending 엔트리를 가져오는 최소 유휴 시간 (ms, 0이면 비활성)
    pub claim_idle_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: "redis".to_owned(),
            redis_url: "redis://127.0.0.1:6379".to_owned(),
            stream: "logs:stream".to_owned(),
            group: "ingest-group".to_owned(),
            consumer: String::new(),
            dead_letter_stream: "logs:dlq".to_owned(),
            batch_size: 500,
            block_ms: 2000,
            start_position: "new".to_owned(),
            claim_idle_ms: DEFAULT_CLAIM_IDLE_MS,
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<(), LogsluiceError> {
        one_of("queue.backend", &self.backend, &["memory", "redis"])?;
        if self.backend == "redis" && self.redis_url.is_empty() {
            return Err(invalid(
                "queue.redis_url",
                "must not be empty when queue.backend is redis",
            ));
        }
        for (field, value) in [
            ("queue.stream", &self.stream),
            ("queue.group", &self.group),
            ("queue.dead_letter_stream", &self.dead_letter_stream),
        ] {
            if value.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        if self.stream == self.dead_letter_stream {
            return Err(invalid(
                "queue.dead_letter_stream",
                "must differ from queue.stream",
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(invalid(
                "queue.batch_size",
                &format!("must be 1-{MAX_BATCH_SIZE}"),
            ));
        }
        if self.block_ms > MAX_BLOCK_MS {
            return Err(invalid(
                "queue.block_ms",
                &format!("must be at most {MAX_BLOCK_MS}"),
            ));
        }
        one_of(
            "queue.start_position",
            &self.start_position,
            &["new", "beginning"],
        )
    }
}

/// 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 백엔드 (memory, sqlite)
    pub backend: String,
    /// SQLite 파일 경로
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_owned(),
            sqlite_path: "/var/lib/logsluice/logsluice.db".to_owned(),
        }
    }
}

/// 배치 워커 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 새 엔트리가 없을 때 다음 루프까지 대기 (ms)
    pub idle_sleep_ms: u64,
    /// 큐 에러 후 재시도 대기 (ms)
    pub error_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_sleep_ms: 100,
            error_backoff_ms: 1000,
        }
    }
}

/// 알림 평가기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 평가 주기 (초)
    pub interval_secs: u64,
    /// 중복 방지 마커 저장소 (memory, redis)
    pub marker_backend: String,
    /// 알림 전달 방식 (현재 "log"만 지원)
    pub notify_methods: Vec<String>,
    /// 임계값 규칙
    pub rules: Vec<AlertRuleConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            marker_backend: "redis".to_owned(),
            notify_methods: vec!["log".to_owned()],
            rules: vec![AlertRuleConfig {
                key: "ERROR".to_owned(),
                level: None,
                service: None,
                threshold: 10,
                window_secs: 60,
            }],
        }
    }
}

impl AlertConfig {
    fn validate(&self) -> Result<(), LogsluiceError> {
        if self.interval_secs == 0 {
            return Err(invalid("alert.interval_secs", "must be greater than 0"));
        }
        one_of(
            "alert.marker_backend",
            &self.marker_backend,
            &["memory", "redis"],
        )?;
        for method in &self.notify_methods {
            one_of("alert.notify_methods", method, &["log"])?;
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if rule.key.is_empty() {
                return Err(invalid("alert.rules.key", "must not be empty"));
            }
            if !seen.insert(rule.key.as_str()) {
                return Err(invalid(
                    "alert.rules.key",
                    &format!("duplicate rule key '{}'", rule.key),
                ));
            }
            if rule.threshold == 0 {
                return Err(invalid(
                    "alert.rules.threshold",
                    &format!("rule '{}': must be greater than 0", rule.key),
                ));
            }
            if rule.window_secs == 0 {
                return Err(invalid(
                    "alert.rules.window_secs",
                    &format!("rule '{}': must be greater than 0", rule.key),
                ));
            }
        }
        Ok(())
    }
}

/// 임계값 알림 규칙
///
/// `level`과 `service`가 모두 없으면 `key`로부터 조건을 유추합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    /// 규칙 키 (마커 키에도 사용)
    pub key: String,
    /// 레벨 조건
    #[serde(default)]
    pub level: Option<String>,
    /// 서비스 조건
    #[serde(default)]
    pub service: Option<String>,
    /// 발송 임계값 (건수)
    pub threshold: u64,
    /// 집계 구간 및 마커 TTL (초)
    pub window_secs: u64,
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 노출 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

fn invalid(field: &str, reason: &str) -> LogsluiceError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
    .into()
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), LogsluiceError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            field,
            &format!("must be one of: {}", allowed.join(", ")),
        ))
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = LogsluiceConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.queue.stream, "logs:stream");
        assert_eq!(config.queue.group, "ingest-group");
        assert_eq!(config.queue.dead_letter_stream, "logs:dlq");
        assert_eq!(config.queue.batch_size, 500);
        assert_eq!(config.queue.block_ms, 2000);
        assert_eq!(config.queue.start_position, "new");
        assert_eq!(config.alert.interval_secs, 5);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        LogsluiceConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = LogsluiceConfig::parse("").unwrap();
        assert_eq!(config.queue.stream, "logs:stream");
        assert_eq!(config.store.backend, "sqlite");
    }

    #[test]
    fn partial_toml_merges_with_defaults() {
        let toml = r#"
[queue]
backend = "memory"
batch_size = 50

[[alert.rules]]
key = "auth"
threshold = 3
window_secs = 30
"#;
        let config = LogsluiceConfig::parse(toml).unwrap();
        assert_eq!(config.queue.backend, "memory");
        assert_eq!(config.queue.batch_size, 50);
        // 지정하지 않은 필드는 기본값 유지
        assert_eq!(config.queue.group, "ingest-group");
        assert_eq!(config.alert.rules.len(), 1);
        assert_eq!(config.alert.rules[0].key, "auth");
        assert_eq!(config.alert.rules[0].level, None);
    }

    #[test]
    fn invalid_toml_returns_parse_error() {
        let err = LogsluiceConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            LogsluiceError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = LogsluiceConfig::default();
        config.queue.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue.batch_size"));
    }

    #[test]
    fn validate_rejects_same_stream_for_dead_letters() {
        let mut config = LogsluiceConfig::default();
        config.queue.dead_letter_stream = config.queue.stream.clone();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dead_letter_stream"));
    }

    #[test]
    fn validate_rejects_unknown_start_position() {
        let mut config = LogsluiceConfig::default();
        config.queue.start_position = "middle".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("start_position"));
    }

    #[test]
    fn validate_rejects_duplicate_rule_keys() {
        let mut config = LogsluiceConfig::default();
        let rule = config.alert.rules[0].clone();
        config.alert.rules.push(rule);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn validate_skips_alert_rules_when_disabled() {
        let mut config = LogsluiceConfig::default();
        config.alert.enabled = false;
        config.alert.rules[0].threshold = 0;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_unknown_notify_method() {
        let mut config = LogsluiceConfig::default();
        config.alert.notify_methods = vec!["pager".to_owned()];
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_apply_to_sections() {
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe {
            std::env::set_var("LOGSLUICE_QUEUE_STREAM", "custom:stream");
            std::env::set_var("LOGSLUICE_QUEUE_BATCH_SIZE", "42");
            std::env::set_var("LOGSLUICE_METRICS_ENABLED", "true");
        }
        let mut config = LogsluiceConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("LOGSLUICE_QUEUE_STREAM");
            std::env::remove_var("LOGSLUICE_QUEUE_BATCH_SIZE");
            std::env::remove_var("LOGSLUICE_METRICS_ENABLED");
        }
        assert_eq!(config.queue.stream, "custom:stream");
        assert_eq!(config.queue.batch_size, 42);
        assert!(config.metrics.enabled);
    }

    #[test]
    #[serial]
    fn env_override_invalid_number_keeps_original() {
        let mut val = 7_u64;
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_LOGSLUICE_U64_BAD", "seven") };
        override_u64(&mut val, "TEST_LOGSLUICE_U64_BAD");
        unsafe { std::env::remove_var("TEST_LOGSLUICE_U64_BAD") };
        assert_eq!(val, 7);
    }

    #[test]
    #[serial]
    fn env_override_csv_trims_entries() {
        let mut val = vec!["a".to_owned()];
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_LOGSLUICE_CSV", "log, ,log2 ") };
        override_csv(&mut val, "TEST_LOGSLUICE_CSV");
        unsafe { std::env::remove_var("TEST_LOGSLUICE_CSV") };
        assert_eq!(val, vec!["log", "log2"]);
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = LogsluiceConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = LogsluiceConfig::parse(&toml_str).unwrap();
        assert_eq!(config.queue.stream, parsed.queue.stream);
        assert_eq!(config.alert.rules, parsed.alert.rules);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = LogsluiceConfig::from_file("/nonexistent/path/logsluice.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LogsluiceError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
