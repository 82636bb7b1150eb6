//! 수집 파이프라인 설정
//!
//! [`IngestConfig`]는 core의 [`QueueConfig`]와 [`WorkerConfig`]를 합쳐
//! 워커와 게이트웨이가 사용하는 설정을 제공합니다.
//! [`EvaluatorConfig`]는 core의 [`AlertConfig`]에서 알림 규칙을 만듭니다.
//!
//! # 사용 예시
//! ```ignore
//! use logsluice_core::config::LogsluiceConfig;
//! use logsluice_ingest::config::IngestConfig;
//!
//! let core = LogsluiceConfig::default();
//! let config = IngestConfig::from_core(&core.queue, &core.worker)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use logsluice_core::config::{
    AlertConfig, DEFAULT_CLAIM_IDLE_MS, MAX_BATCH_SIZE, MAX_BLOCK_MS, QueueConfig, WorkerConfig,
};

use crate::alert::AlertRule;
use crate::error::IngestError;
use crate::queue::StartPosition;

fn config_err(field: &str, reason: impl Into<String>) -> IngestError {
    IngestError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// `consumer-<8 hex>` 형식의 컨슈머 이름을 생성합니다.
pub fn generate_consumer_name() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("consumer-{}", &hex[..8])
}

/// 큐와 워커 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// 로그 스트림 이름
    pub stream: String,
    /// 컨슈머 그룹 이름
    pub group: String,
    /// 이 워커의 컨슈머 이름
    pub consumer: String,
    /// 데드레터 스트림 이름
    pub dead_letter_stream: String,
    /// 한 번에 읽는 최대 엔트리 수
    pub batch_size: usize,
    /// 새 엔트리 대기 타임아웃 (ms)
    pub block_ms: u64,
    /// 그룹 생성 시 시작 위치
    #[serde(skip)]
    pub start_position: StartPosition,
    /// 유휴 pending 엔트리 회수 기준 (ms, 0이면 비활성)
    pub claim_idle_ms: u64,
    /// 새 엔트리가 없을 때 대기 (ms)
    pub idle_sleep_ms: u64,
    /// 큐 에러 후 대기 (ms)
    pub error_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            stream: "logs:stream".to_owned(),
            group: "ingest-group".to_owned(),
            consumer: generate_consumer_name(),
            dead_letter_stream: "logs:dlq".to_owned(),
            batch_size: 500,
            block_ms: 2000,
            start_position: StartPosition::New,
            claim_idle_ms: DEFAULT_CLAIM_IDLE_MS,
            idle_sleep_ms: 100,
            error_backoff_ms: 1000,
        }
    }
}

impl IngestConfig {
    /// core 설정에서 생성합니다. 컨슈머 이름이 비어 있으면 새로 생성합니다.
    pub fn from_core(queue: &QueueConfig, worker: &WorkerConfig) -> Result<Self, IngestError> {
        let consumer = if queue.consumer.is_empty() {
            generate_consumer_name()
        } else {
            queue.consumer.clone()
        };
        let config = Self {
            stream: queue.stream.clone(),
            group: queue.group.clone(),
            consumer,
            dead_letter_stream: queue.dead_letter_stream.clone(),
            batch_size: queue.batch_size,
            block_ms: queue.block_ms,
            start_position: queue.start_position.parse()?,
            claim_idle_ms: queue.claim_idle_ms,
            idle_sleep_ms: worker.idle_sleep_ms,
            error_backoff_ms: worker.error_backoff_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IngestError> {
        for (field, value) in [
            ("stream", &self.stream),
            ("group", &self.group),
            ("consumer", &self.consumer),
            ("dead_letter_stream", &self.dead_letter_stream),
        ] {
            if value.is_empty() {
                return Err(config_err(field, "must not be empty"));
            }
        }
        if self.stream == self.dead_letter_stream {
            return Err(config_err("dead_letter_stream", "must differ from stream"));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(config_err("batch_size", format!("must be 1-{MAX_BATCH_SIZE}")));
        }
        if self.block_ms > MAX_BLOCK_MS {
            return Err(config_err("block_ms", format!("must be at most {MAX_BLOCK_MS}")));
        }
        Ok(())
    }

    /// 블로킹 읽기 타임아웃
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    /// 빈 읽기 후 대기 시간
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// 큐 에러 후 대기 시간
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// 유휴 엔트리 회수 기준 (비활성이면 `None`)
    pub fn claim_idle(&self) -> Option<Duration> {
        (self.claim_idle_ms > 0).then(|| Duration::from_millis(self.claim_idle_ms))
    }
}

/// 수집 설정 빌더
#[derive(Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 스트림 이름을 설정합니다.
    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.config.stream = stream.into();
        self
    }

    /// 컨슈머 그룹을 설정합니다.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.config.group = group.into();
        self
    }

    /// 컨슈머 이름을 설정합니다.
    pub fn consumer(mut self, consumer: impl Into<String>) -> Self {
        self.config.consumer = consumer.into();
        self
    }

    /// 데드레터 스트림을 설정합니다.
    pub fn dead_letter_stream(mut self, stream: impl Into<String>) -> Self {
        self.config.dead_letter_stream = stream.into();
        self
    }

    /// 배치 크기를 설정합니다.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// 블로킹 타임아웃(ms)을 설정합니다.
    pub fn block_ms(mut self, ms: u64) -> Self {
        self.config.block_ms = ms;
        self
    }

    /// 그룹 시작 위치를 설정합니다.
    pub fn start_position(mut self, start: StartPosition) -> Self {
        self.config.start_position = start;
        self
    }

    /// 유휴 회수 기준(ms)을 설정합니다.
    pub fn claim_idle_ms(mut self, ms: u64) -> Self {
        self.config.claim_idle_ms = ms;
        self
    }

    /// 빈 읽기 후 대기(ms)를 설정합니다.
    pub fn idle_sleep_ms(mut self, ms: u64) -> Self {
        self.config.idle_sleep_ms = ms;
        self
    }

    /// 에러 후 대기(ms)를 설정합니다.
    pub fn error_backoff_ms(mut self, ms: u64) -> Self {
        self.config.error_backoff_ms = ms;
        self
    }

    /// 설정을 검증하고 `IngestConfig`를 생성합니다.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// 알림 평가기 설정
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// 평가 주기
    pub interval: Duration,
    /// 규칙 목록
    pub rules: Vec<AlertRule>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self::from_core(&AlertConfig::default())
    }
}

impl EvaluatorConfig {
    /// core의 알림 설정에서 생성합니다.
    pub fn from_core(core: &AlertConfig) -> Self {
        Self {
            interval: Duration::from_secs(core.interval_secs),
            rules: core.rules.iter().map(AlertRule::from_config).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = IngestConfig::default();
        config.validate().unwrap();
        assert!(config.consumer.starts_with("consumer-"));
        assert_eq!(config.consumer.len(), "consumer-".len() + 8);
        assert_eq!(config.claim_idle(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn from_core_generates_consumer_when_blank() {
        let queue = QueueConfig::default();
        let worker = WorkerConfig::default();
        let a = IngestConfig::from_core(&queue, &worker).unwrap();
        let b = IngestConfig::from_core(&queue, &worker).unwrap();
        assert_ne!(a.consumer, b.consumer);
        assert_eq!(a.stream, "logs:stream");
        assert_eq!(a.block(), Duration::from_millis(2000));
    }

    #[test]
    fn from_core_keeps_explicit_values() {
        let queue = QueueConfig {
            consumer: "worker-1".to_owned(),
            start_position: "beginning".to_owned(),
            claim_idle_ms: 30_000,
            ..Default::default()
        };
        let config = IngestConfig::from_core(&queue, &WorkerConfig::default()).unwrap();
        assert_eq!(config.consumer, "worker-1");
        assert_eq!(config.start_position, StartPosition::Beginning);
        assert_eq!(config.claim_idle(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn builder_rejects_same_stream_for_dead_letters() {
        let err = IngestConfigBuilder::new()
            .stream("s")
            .dead_letter_stream("s")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("dead_letter_stream"));
    }

    #[test]
    fn builder_rejects_zero_batch() {
        assert!(IngestConfigBuilder::new().batch_size(0).build().is_err());
        let config = IngestConfigBuilder::new()
            .batch_size(10)
            .block_ms(0)
            .build()
            .unwrap();
        assert_eq!(config.block(), Duration::ZERO);
    }

    #[test]
    fn evaluator_config_from_core_defaults() {
        let config = EvaluatorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].key, "ERROR");
        assert_eq!(config.rules[0].threshold, 10);
    }
}
