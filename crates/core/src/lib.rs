//! # logsluice-core
//!
//! logsluice 워크스페이스의 공통 기반 크레이트입니다.
//!
//! - [`error`]: 도메인별 에러 타입
//! - [`config`]: `logsluice.toml` 파싱과 환경변수 오버라이드
//! - [`pipeline`]: 장기 실행 모듈의 생명주기 trait과 건강 상태
//! - [`types`]: 로그 레코드, 앱 등록, 큐 엔트리 ID 등 도메인 타입
//! - [`metrics`]: Prometheus 메트릭 이름과 설명

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, LogsluiceError, PipelineError, QueueError, StorageError};

// 설정
pub use config::LogsluiceConfig;

// 파이프라인 trait
pub use pipeline::{BoxFuture, DynPipeline, HealthStatus, Pipeline};

// 도메인 타입
pub use types::{
    AppRef, AppRegistration, EntryId, LogFilter, LogLevel, LogRecord, LogStats, NewLogRecord,
};
