//! 내구성 큐 -- 컨슈머 그룹 기반의 추가 전용 로그
//!
//! [`DurableQueue`]는 엔트리를 추가하고, 이름 있는 컨슈머 그룹으로 분배하며,
//! ack되지 않은 엔트리를 그룹의 pending 집합에 보관합니다.
//! pending 집합은 큐가 소유하므로 워커가 재시작해도 미처리 엔트리를 복구할 수 있습니다.
//!
//! # 백엔드
//! - [`MemoryQueue`]: 프로세스 내 구현 (테스트 및 단일 프로세스 실행)
//! - [`RedisStreamQueue`]: Redis Streams (`XADD`, `XREADGROUP`, `XACK`)
//!
//! 설정에 따른 선택은 [`QueueBackend`] 열거형이 위임으로 처리합니다.

pub mod memory;
pub mod redis_stream;

use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use logsluice_core::error::QueueError;
use logsluice_core::types::EntryId;

use crate::error::IngestError;

pub use self::memory::MemoryQueue;
pub use self::redis_stream::RedisStreamQueue;

/// 큐 엔트리의 필드 맵
///
/// 큐는 내용을 해석하지 않습니다.
pub type Fields = BTreeMap<String, String>;

/// 큐에서 읽은 엔트리
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// 큐가 부여한 단조 증가 ID
    pub id: EntryId,
    /// 필드 맵
    pub fields: Fields,
}

impl QueueEntry {
    /// 필드 값을 조회합니다.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// 컨슈머 그룹 생성 시 시작 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// 그룹 생성 이후 추가되는 엔트리부터 (`$`)
    #[default]
    New,
    /// 로그의 처음부터 (`0`)
    Beginning,
}

impl FromStr for StartPosition {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" | "$" => Ok(Self::New),
            "beginning" | "0" => Ok(Self::Beginning),
            other => Err(IngestError::Config {
                field: "start_position".to_owned(),
                reason: format!("unknown start position '{other}', expected new or beginning"),
            }),
        }
    }
}

/// 내구성 큐 trait
///
/// 모든 읽기는 가장 오래된 엔트리부터 반환합니다.
/// 한 그룹 안에서 하나의 엔트리는 동시에 하나의 컨슈머에게만 전달됩니다.
pub trait DurableQueue: Send + Sync {
    /// 큐(스트림) 이름
    fn name(&self) -> &str;

    /// 엔트리 하나를 추가합니다. 컨슈머를 기다리지 않습니다.
    fn enqueue(&self, fields: Fields)
    -> impl Future<Output = Result<EntryId, QueueError>> + Send;

    /// 여러 엔트리를 순서를 유지하며 원자적으로 추가합니다 (전부 또는 전무).
    fn enqueue_batch(
        &self,
        batch: Vec<Fields>,
    ) -> impl Future<Output = Result<Vec<EntryId>, QueueError>> + Send;

    /// 컨슈머 그룹을 생성합니다. 이미 존재하면 아무것도 하지 않습니다.
    fn ensure_group(
        &self,
        group: &str,
        start: StartPosition,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// `consumer`에게 전달되었지만 ack되지 않은 엔트리를 반환합니다.
    ///
    /// 새 엔트리는 소비하지 않습니다.
    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, QueueError>> + Send;

    /// 그룹 내에서 한 번도 전달되지 않은 엔트리를 최대 `limit`개 반환합니다.
    ///
    /// 엔트리가 없으면 `block`만큼 기다린 뒤 빈 목록을 반환합니다.
    /// `block`이 0이면 기다리지 않습니다.
    fn read_new(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
        block: Duration,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, QueueError>> + Send;

    /// 다른 컨슈머의 pending 집합에 `min_idle` 이상 머문 엔트리를
    /// `consumer`에게 넘기고 반환합니다.
    fn claim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, QueueError>> + Send;

    /// 엔트리를 그룹의 pending 집합에서 제거합니다.
    ///
    /// pending이 아닌 엔트리는 무시하며, 실제로 제거된 수를 반환합니다.
    fn ack(
        &self,
        group: &str,
        ids: &[EntryId],
    ) -> impl Future<Output = Result<usize, QueueError>> + Send;

    /// 그룹과 무관하게 `after` 이후의 엔트리를 ID 순으로 읽습니다.
    fn range(
        &self,
        after: Option<EntryId>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, QueueError>> + Send;

    /// 로그에 남아 있는 엔트리 수
    fn len(&self) -> impl Future<Output = Result<usize, QueueError>> + Send;

    /// 그룹의 pending 엔트리 수
    fn pending_count(&self, group: &str)
    -> impl Future<Output = Result<usize, QueueError>> + Send;

    /// 연결 상태를 확인합니다.
    fn ping(&self) -> impl Future<Output = Result<(), QueueError>> + Send;
}

/// 큐 페이로드 봉투
///
/// 레코드는 JSON 문자열로 인코딩되어 `data` 필드에 담깁니다.
pub struct QueueEnvelope;

impl QueueEnvelope {
    /// 레코드가 담기는 필드 이름
    pub const DATA_FIELD: &'static str = "data";

    /// 레코드를 큐 필드로 감쌉니다.
    pub fn wrap(record: &serde_json::Value) -> Result<Fields, IngestError> {
        let data = serde_json::to_string(record)?;
        Ok(Fields::from([(Self::DATA_FIELD.to_owned(), data)]))
    }

    /// 엔트리의 원본 `data` 문자열
    pub fn raw(entry: &QueueEntry) -> Option<&str> {
        entry.field(Self::DATA_FIELD)
    }

    /// 엔트리에서 레코드를 꺼냅니다.
    pub fn unwrap(entry: &QueueEntry) -> Result<serde_json::Value, IngestError> {
        let raw = Self::raw(entry).ok_or_else(|| IngestError::Decode {
            entry_id: entry.id.to_string(),
            reason: format!("missing '{}' field", Self::DATA_FIELD),
        })?;
        serde_json::from_str(raw).map_err(|e| IngestError::Decode {
            entry_id: entry.id.to_string(),
            reason: format!("invalid json: {e}"),
        })
    }
}

/// 설정으로 선택되는 큐 백엔드
#[derive(Clone)]
pub enum QueueBackend {
    /// 프로세스 내 큐
    Memory(MemoryQueue),
    /// Redis Streams
    Redis(RedisStreamQueue),
}

impl QueueBackend {
    /// 백엔드 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

impl From<MemoryQueue> for QueueBackend {
    fn from(queue: MemoryQueue) -> Self {
        Self::Memory(queue)
    }
}

impl From<RedisStreamQueue> for QueueBackend {
    fn from(queue: RedisStreamQueue) -> Self {
        Self::Redis(queue)
    }
}

macro_rules! delegate {
    ($self:ident, $q:ident => $call:expr) => {
        match $self {
            QueueBackend::Memory($q) => $call.await,
            QueueBackend::Redis($q) => $call.await,
        }
    };
}

impl DurableQueue for QueueBackend {
    fn name(&self) -> &str {
        match self {
            Self::Memory(q) => q.name(),
            Self::Redis(q) => q.name(),
        }
    }

    async fn enqueue(&self, fields: Fields) -> Result<EntryId, QueueError> {
        delegate!(self, q => q.enqueue(fields))
    }

    async fn enqueue_batch(&self, batch: Vec<Fields>) -> Result<Vec<EntryId>, QueueError> {
        delegate!(self, q => q.enqueue_batch(batch))
    }

    async fn ensure_group(&self, group: &str, start: StartPosition) -> Result<(), QueueError> {
        delegate!(self, q => q.ensure_group(group, start))
    }

    async fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        delegate!(self, q => q.read_pending(group, consumer, limit))
    }

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
        block: Duration,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        delegate!(self, q => q.read_new(group, consumer, limit, block))
    }

    async fn claim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        delegate!(self, q => q.claim_idle(group, consumer, min_idle, limit))
    }

    async fn ack(&self, group: &str, ids: &[EntryId]) -> Result<usize, QueueError> {
        delegate!(self, q => q.ack(group, ids))
    }

    async fn range(
        &self,
        after: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        delegate!(self, q => q.range(after, limit))
    }

    async fn len(&self) -> Result<usize, QueueError> {
        delegate!(self, q => q.len())
    }

    async fn pending_count(&self, group: &str) -> Result<usize, QueueError> {
        delegate!(self, q => q.pending_count(group))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        delegate!(self, q => q.ping())
    }
}
