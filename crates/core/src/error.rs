//! 에러 타입 -- 설정, 파이프라인, 큐, 저장소 에러

/// logsluice 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogsluiceError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 큐 백엔드 에러
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,

    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

/// 큐 백엔드 에러
///
/// `Unavailable`은 복구 가능한 상태로, 게이트웨이가 직접 저장 경로로
/// 전환하는 신호입니다.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// 백엔드에 연결할 수 없음
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// 존재하지 않는 컨슈머 그룹
    #[error("consumer group not found: {group}")]
    GroupNotFound { group: String },

    /// 유효하지 않은 엔트리 ID
    #[error("invalid entry id: {0}")]
    InvalidEntryId(String),

    /// 기타 백엔드 에러
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl QueueError {
    /// 연결 불가 상태인지 확인합니다.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),

    /// 유니크 제약 위반 (앱 이름 중복)
    #[error("unique constraint violated: {names:?}")]
    Conflict { names: Vec<String> },

    /// 대상 레코드 없음
    #[error("not found: {0}")]
    NotFound(String),
}
