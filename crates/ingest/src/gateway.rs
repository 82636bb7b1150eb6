//! 수집 게이트웨이 -- 배치를 큐에 넣거나, 큐 장애 시 직접 저장
//!
//! 게이트웨이의 부수 효과는 "전부 큐에 추가" 또는 "전부 직접 저장 시도" 중
//! 정확히 하나입니다. 내부 재시도는 하지 않습니다.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use logsluice_core::error::QueueError;
use logsluice_core::metrics as m;

use crate::error::IngestError;
use crate::queue::{DurableQueue, Fields, QueueEnvelope};
use crate::resolver::BulkResolver;
use crate::schema;
use crate::store::LogStore;

/// 레코드가 처리된 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestPath {
    /// 큐에 추가됨
    Queued,
    /// 큐 장애로 직접 저장됨
    Direct,
}

impl IngestPath {
    /// 메트릭 레이블 값
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Direct => "direct",
        }
    }
}

/// 게이트웨이 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// 수락된 레코드 수
    pub accepted: usize,
    /// 처리 경로
    pub path: IngestPath,
}

/// 수집 게이트웨이
pub struct IngestGateway<Q, S> {
    queue: Q,
    resolver: BulkResolver<S>,
}

impl<Q: DurableQueue, S: LogStore> IngestGateway<Q, S> {
    /// 큐와 직접 저장용 리졸버로 게이트웨이를 생성합니다.
    pub fn new(queue: Q, resolver: BulkResolver<S>) -> Self {
        Self { queue, resolver }
    }

    /// 원시 요청 본문(JSON 배열/객체 또는 NDJSON)을 제출합니다.
    pub async fn submit_body(&self, body: &[u8]) -> Result<IngestReceipt, IngestError> {
        let items = match schema::decode_body(body) {
            Ok(items) => items,
            Err(e) => {
                metrics::counter!(m::GATEWAY_BATCHES_REJECTED_TOTAL).increment(1);
                return Err(e);
            }
        };
        self.submit(items).await
    }

    /// 후보 레코드 배치를 제출합니다.
    ///
    /// 형태 검사에 실패하면 아무것도 큐에 넣지 않고 [`IngestError::MalformedBatch`]를 반환합니다.
    pub async fn submit(&self, items: Vec<Value>) -> Result<IngestReceipt, IngestError> {
        if let Err(e) = schema::check_shape(&items) {
            metrics::counter!(m::GATEWAY_BATCHES_REJECTED_TOTAL).increment(1);
            tracing::debug!(error = %e, "batch rejected");
            return Err(e);
        }

        let batch = items
            .iter()
            .map(QueueEnvelope::wrap)
            .collect::<Result<Vec<Fields>, _>>()?;

        let receipt = match self.queue.enqueue_batch(batch).await {
            Ok(ids) => IngestReceipt {
                accepted: ids.len(),
                path: IngestPath::Queued,
            },
            Err(QueueError::Unavailable(reason)) => {
                metrics::counter!(m::GATEWAY_FALLBACKS_TOTAL).increment(1);
                tracing::warn!(
                    stream = %self.queue.name(),
                    reason = %reason,
                    count = items.len(),
                    "queue unavailable, persisting batch directly"
                );
                self.persist_direct(&items).await?
            }
            Err(e) => return Err(e.into()),
        };

        metrics::counter!(m::GATEWAY_RECORDS_ACCEPTED_TOTAL, m::LABEL_PATH => receipt.path.as_str())
            .increment(receipt.accepted as u64);
        Ok(receipt)
    }

    async fn persist_direct(&self, items: &[Value]) -> Result<IngestReceipt, IngestError> {
        let records = schema::validate_batch(items, Utc::now())?;
        let persisted = self.resolver.persist(records).await?;
        Ok(IngestReceipt {
            accepted: persisted.len(),
            path: IngestPath::Direct,
        })
    }
}
