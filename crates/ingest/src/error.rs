//! 수집 파이프라인 에러 타입
//!
//! [`IngestError`]는 게이트웨이, 워커, 리졸버에서 발생하는 모든 에러를 표현합니다.
//! `From<IngestError> for LogsluiceError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use std::fmt;

use logsluice_core::error::{
    ConfigError, LogsluiceError, PipelineError, QueueError, StorageError,
};

/// 배치 내 개별 항목의 실패 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// 배치 내 위치 (0부터 시작)
    pub index: usize,
    /// 실패 사유
    pub reason: String,
}

impl ItemFailure {
    /// 새 실패 정보를 생성합니다.
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {}: {}", self.index, self.reason)
    }
}

fn join_failures(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn failure_suffix(failures: &[ItemFailure]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(": {}", join_failures(failures))
    }
}

/// 수집 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 큐 백엔드에 연결할 수 없음 (게이트웨이는 직접 저장 경로로 전환)
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// 클라이언트 입력 오류, 배치 전체 거부
    #[error("malformed batch: {reason}{}", failure_suffix(.failures))]
    MalformedBatch {
        /// 요약 사유
        reason: String,
        /// 실패한 모든 항목
        failures: Vec<ItemFailure>,
    },

    /// 개별 큐 엔트리 디코딩 실패
    #[error("decode error: entry {entry_id}: {reason}")]
    Decode {
        /// 큐 엔트리 ID
        entry_id: String,
        /// 실패 사유
        reason: String,
    },

    /// 스키마 검증 실패
    #[error("validation error: {}", join_failures(.failures))]
    Validation {
        /// 실패한 모든 항목
        failures: Vec<ItemFailure>,
    },

    /// 일괄 저장 실패
    #[error("persistence error: {0}")]
    Persistence(String),

    /// 기타 큐 에러
    #[error("queue error: {0}")]
    Queue(QueueError),

    /// 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 알림 중복 방지 마커 저장소 에러
    #[error("marker store error: {0}")]
    Marker(String),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// JSON 직렬화 에러
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    /// 잘못된 배치 에러를 생성합니다.
    pub fn malformed(reason: impl Into<String>, failures: Vec<ItemFailure>) -> Self {
        Self::MalformedBatch {
            reason: reason.into(),
            failures,
        }
    }

    /// 큐 연결 불가 에러인지 확인합니다.
    pub fn is_queue_unavailable(&self) -> bool {
        matches!(self, Self::QueueUnavailable(_))
    }
}

impl From<QueueError> for IngestError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Unavailable(reason) => Self::QueueUnavailable(reason),
            other => Self::Queue(other),
        }
    }
}

impl From<IngestError> for LogsluiceError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::QueueUnavailable(reason) => {
                LogsluiceError::Queue(QueueError::Unavailable(reason))
            }
            IngestError::Queue(e) => LogsluiceError::Queue(e),
            IngestError::Storage(e) => LogsluiceError::Storage(e),
            IngestError::Config { field, reason } => {
                LogsluiceError::Config(ConfigError::InvalidValue { field, reason })
            }
            IngestError::Channel(reason) => {
                LogsluiceError::Pipeline(PipelineError::ChannelSend(reason))
            }
            other => LogsluiceError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_batch_lists_every_failure() {
        let err = IngestError::malformed(
            "2 invalid items",
            vec![
                ItemFailure::new(0, "missing level"),
                ItemFailure::new(3, "not an object"),
            ],
        );
        let msg = err.to_string();
        assert!(msg.contains("item 0: missing level"));
        assert!(msg.contains("item 3: not an object"));
    }

    #[test]
    fn malformed_batch_without_items() {
        let err = IngestError::malformed("empty payload", Vec::new());
        assert_eq!(err.to_string(), "malformed batch: empty payload");
    }

    #[test]
    fn queue_unavailable_converts_from_queue_error() {
        let err: IngestError = QueueError::Unavailable("refused".to_owned()).into();
        assert!(err.is_queue_unavailable());

        let err: IngestError = QueueError::Backend("WRONGTYPE".to_owned()).into();
        assert!(matches!(err, IngestError::Queue(_)));
    }

    #[test]
    fn converts_to_core_error() {
        let err: LogsluiceError = IngestError::Storage(StorageError::NotFound("x".to_owned())).into();
        assert!(matches!(err, LogsluiceError::Storage(_)));

        let err: LogsluiceError = IngestError::Persistence("boom".to_owned()).into();
        assert!(err.to_string().contains("boom"));
    }
}
