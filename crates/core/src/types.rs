//! 도메인 타입 -- 로그 레코드, 앱 등록, 큐 엔트리 ID, 조회 필터
//!
//! 큐, 저장소, 워커, 알림 평가기가 공유하는 데이터 구조를 정의합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::QueueError;

/// 큐 엔트리 식별자
///
/// `(밀리초, 시퀀스)` 쌍이며 `"<millis>-<seq>"` 형식으로 표시됩니다.
/// Redis Streams ID와 같은 형식이며, 쌍의 사전식 순서로 정렬됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    /// 밀리초 타임스탬프
    pub millis: u64,
    /// 같은 밀리초 내 시퀀스
    pub seq: u64,
}

impl EntryId {
    /// 가장 작은 ID (`0-0`)
    pub const MIN: EntryId = EntryId { millis: 0, seq: 0 };

    /// 새 ID를 생성합니다.
    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// 바로 다음 ID를 반환합니다.
    pub fn next(self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self { millis: self.millis, seq },
            None => Self {
                millis: self.millis.saturating_add(1),
                seq: 0,
            },
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QueueError::InvalidEntryId(s.to_owned());
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, Some(seq)),
            None => (s, None),
        };
        let millis = millis.parse::<u64>().map_err(|_| invalid())?;
        let seq = match seq {
            Some(seq) => seq.parse::<u64>().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self { millis, seq })
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 로그 레벨
///
/// 알려진 네 가지 레벨은 대소문자 구분 없이 인식되어 대문자로 정규화됩니다.
/// 그 외 값은 원문 그대로 `Other`에 보관됩니다.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// 디버그
    Debug,
    /// 정보
    Info,
    /// 경고 (`WARN` 별칭 포함)
    Warning,
    /// 에러
    Error,
    /// 알려지지 않은 레벨
    Other(String),
}

impl LogLevel {
    /// 문자열에서 레벨을 파싱합니다.
    ///
    /// 알려진 레벨만 `Some`을 반환합니다.
    pub fn from_known(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// 문자열에서 레벨을 파싱합니다. 알 수 없는 값은 `Other`가 됩니다.
    pub fn parse(s: &str) -> Self {
        Self::from_known(s).unwrap_or_else(|| Self::Other(s.to_owned()))
    }

    /// 저장 형식 문자열
    pub fn as_str(&self) -> &str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// 레코드가 참조하는 애플리케이션
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppRef {
    /// 숫자 ID로만 참조
    Id(i64),
    /// 이름으로만 참조
    Name(String),
    /// ID와 이름을 모두 제출 (ID 우선)
    Both { id: i64, name: String },
}

impl AppRef {
    /// 명시적 app_id
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Id(id) | Self::Both { id, .. } => Some(*id),
            Self::Name(_) => None,
        }
    }

    /// 제출된 앱 이름
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Name(name) | Self::Both { name, .. } => Some(name),
            Self::Id(_) => None,
        }
    }
}

/// 스키마 검증을 통과한 저장 전 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLogRecord {
    /// 로그 레벨
    pub level: LogLevel,
    /// 메시지
    pub message: String,
    /// 서비스 식별자
    pub service: String,
    /// 애플리케이션 참조
    pub app: AppRef,
    /// 임의 메타데이터
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// 이벤트 시각
    pub timestamp: DateTime<Utc>,
}

/// 저장된 로그 레코드
///
/// 저장 후에는 변경되지 않습니다. `app`은 저장 시점의 앱 이름입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// 저장소가 부여한 ID
    pub id: i64,
    /// 로그 레벨
    pub level: LogLevel,
    /// 메시지
    pub message: String,
    /// 서비스 식별자
    pub service: String,
    /// 해석된 애플리케이션 ID
    pub app_id: i64,
    /// 비정규화된 애플리케이션 이름
    pub app: String,
    /// 임의 메타데이터
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// 이벤트 시각
    pub timestamp: DateTime<Utc>,
}

/// 애플리케이션 등록 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRegistration {
    /// 고유 ID
    pub id: i64,
    /// 고유 이름
    pub name: String,
    /// 설명
    pub description: Option<String>,
}

/// 로그 조회 필터
///
/// 모든 조건은 AND로 결합됩니다. `since`는 포함, `until`은 제외 경계입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub service: Option<String>,
    pub app: Option<String>,
    pub app_id: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl LogFilter {
    /// 레코드가 필터 조건을 만족하는지 확인합니다.
    pub fn matches(&self, record: &LogRecord) -> bool {
        self.level.as_ref().is_none_or(|l| *l == record.level)
            && self.service.as_ref().is_none_or(|s| *s == record.service)
            && self.app.as_ref().is_none_or(|a| *a == record.app)
            && self.app_id.is_none_or(|id| id == record.app_id)
            && self.since.is_none_or(|t| record.timestamp >= t)
            && self.until.is_none_or(|t| record.timestamp < t)
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    /// 전체 레코드 수
    pub total: u64,
    /// 레벨별 레코드 수
    pub by_level: BTreeMap<String, u64>,
    /// 서비스별 레코드 수
    pub by_service: BTreeMap<String, u64>,
}
