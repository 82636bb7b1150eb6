//! 데드레터 싱크 -- 처리할 수 없는 큐 엔트리를 보관하는 보조 로그
//!
//! 엔트리는 실패 사유와 원본 큐 엔트리 ID를 담아 한 번만 기록되며,
//! 자동으로 재시도되지 않습니다.

use serde::{Deserialize, Serialize};

use logsluice_core::types::EntryId;

use crate::error::IngestError;
use crate::queue::{DurableQueue, Fields, QueueEntry};

const ERROR_FIELD: &str = "error";
const MSG_ID_FIELD: &str = "msg_id";
const PAYLOAD_FIELD: &str = "payload";

/// 데드레터 엔트리
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// 실패 사유
    pub error: String,
    /// 실패한 원본 큐 엔트리 ID
    pub msg_id: EntryId,
    /// 원본 `data` 문자열 (재제출용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl DeadLetterEntry {
    /// 새 엔트리를 생성합니다.
    pub fn new(error: impl Into<String>, msg_id: EntryId, payload: Option<String>) -> Self {
        Self {
            error: error.into(),
            msg_id,
            payload,
        }
    }

    /// 큐 필드로 변환합니다.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::from([
            (ERROR_FIELD.to_owned(), self.error.clone()),
            (MSG_ID_FIELD.to_owned(), self.msg_id.to_string()),
        ]);
        if let Some(payload) = &self.payload {
            fields.insert(PAYLOAD_FIELD.to_owned(), payload.clone());
        }
        fields
    }

    /// 큐 엔트리에서 데드레터 엔트리를 복원합니다.
    pub fn from_entry(entry: &QueueEntry) -> Result<Self, IngestError> {
        let decode_err = |reason: String| IngestError::Decode {
            entry_id: entry.id.to_string(),
            reason,
        };
        let error = entry
            .field(ERROR_FIELD)
            .ok_or_else(|| decode_err(format!("missing '{ERROR_FIELD}' field")))?;
        let msg_id = entry
            .field(MSG_ID_FIELD)
            .ok_or_else(|| decode_err(format!("missing '{MSG_ID_FIELD}' field")))?
            .parse::<EntryId>()
            .map_err(|e| decode_err(e.to_string()))?;
        Ok(Self {
            error: error.to_owned(),
            msg_id,
            payload: entry.field(PAYLOAD_FIELD).map(str::to_owned),
        })
    }
}

/// 데드레터 싱크
///
/// 데드레터 스트림으로 사용하는 별도의 [`DurableQueue`]를 감쌉니다.
#[derive(Clone)]
pub struct DeadLetterSink<Q> {
    queue: Q,
}

impl<Q: DurableQueue> DeadLetterSink<Q> {
    /// 데드레터 스트림 큐로 싱크를 생성합니다.
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    /// 데드레터 스트림 이름
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// 엔트리 하나를 기록합니다.
    pub async fn record(&self, entry: &DeadLetterEntry) -> Result<EntryId, IngestError> {
        let id = self.queue.enqueue(entry.to_fields()).await?;
        tracing::warn!(
            stream = %self.queue.name(),
            msg_id = %entry.msg_id,
            error = %entry.error,
            "entry dead-lettered"
        );
        Ok(id)
    }

    /// 여러 엔트리를 한 번에 기록합니다 (전부 또는 전무).
    pub async fn record_all(&self, entries: &[DeadLetterEntry]) -> Result<Vec<EntryId>, IngestError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let batch = entries.iter().map(DeadLetterEntry::to_fields).collect();
        let ids = self.queue.enqueue_batch(batch).await?;
        tracing::warn!(
            stream = %self.queue.name(),
            count = entries.len(),
            error = %entries[0].error,
            "batch dead-lettered"
        );
        Ok(ids)
    }

    /// `after` 이후의 엔트리를 최대 `limit`개 읽습니다.
    ///
    /// 형식이 맞지 않는 엔트리는 경고 후 건너뜁니다.
    pub async fn list(
        &self,
        after: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<(EntryId, DeadLetterEntry)>, IngestError> {
        let entries = self.queue.range(after, limit).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            match DeadLetterEntry::from_entry(entry) {
                Ok(dead) => out.push((entry.id, dead)),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable dead-letter entry"),
            }
        }
        Ok(out)
    }

    /// 기록된 엔트리 수
    pub async fn len(&self) -> Result<usize, IngestError> {
        Ok(self.queue.len().await?)
    }

    /// 연결 상태를 확인합니다.
    pub async fn ping(&self) -> Result<(), IngestError> {
        Ok(self.queue.ping().await?)
    }
}
