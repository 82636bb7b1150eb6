//! # logsluice-ingest
//!
//! 내구성 큐를 거쳐 로그를 저장소에 영속화하는 수집 파이프라인입니다.
//!
//! # 모듈 구성
//!
//! - [`queue`]: 컨슈머 그룹과 pending 집합을 갖는 내구성 큐 (메모리, Redis Streams)
//! - [`dead_letter`]: 처리할 수 없는 엔트리를 보관하는 데드레터 싱크
//! - [`store`]: 앱 등록과 로그 레코드 저장소 (메모리, SQLite)
//! - [`schema`]: 요청 본문 디코딩, 형태 검사, 스키마 검증
//! - [`resolver`]: 앱 참조 해석과 원자적 일괄 저장
//! - [`gateway`]: 큐 추가 또는 직접 저장으로 배치를 수락하는 게이트웨이
//! - [`worker`]: 큐를 소비하는 배치 워커 (Pipeline trait 구현)
//! - [`alert`]: 임계값 알림 평가기 (Pipeline trait 구현)
//! - [`marker`]: 알림 중복 방지 마커 저장소
//! - [`config`]: 워커/평가기 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Gateway ──enqueue──> DurableQueue ──> BatchWorker ──> BulkResolver ──> LogStore
//!    │                                      │                              ^
//!    └──────── QueueUnavailable ────────────┼──────> BulkResolver ─────────┘
//!                                           └──실패──> DeadLetterSink
//!
//! AlertEvaluator ──count──> LogStore
//!        └──set-if-absent──> MarkerStore
//! ```

pub mod alert;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod gateway;
pub mod marker;
pub mod queue;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod worker;

// --- 주요 타입 re-export ---

// 워커
pub use worker::{BatchOutcome, BatchWorker, BatchWorkerBuilder, WorkerStats};

// 알림
pub use alert::{AlertEvaluator, AlertEvaluatorBuilder, AlertNotification, AlertRule};
pub use marker::{FallbackMarkerStore, MarkerBackend, MarkerStore, MemoryMarkerStore, RedisMarkerStore};

// 게이트웨이
pub use gateway::{IngestGateway, IngestPath, IngestReceipt};
pub use resolver::BulkResolver;

// 큐
pub use dead_letter::{DeadLetterEntry, DeadLetterSink};
pub use queue::{
    DurableQueue, Fields, MemoryQueue, QueueBackend, QueueEntry, QueueEnvelope, RedisStreamQueue,
    StartPosition,
};

// 저장소
pub use store::{InsertLog, LogStore, MemoryStore, SqliteStore, StoreBackend};

// 설정
pub use config::{EvaluatorConfig, IngestConfig, IngestConfigBuilder};

// 에러
pub use error::{IngestError, ItemFailure};
