//! 로그 저장소 -- 애플리케이션 등록과 로그 레코드의 영속화
//!
//! [`LogStore`]는 리졸버와 알림 평가기가 호출하는 저장소 인터페이스입니다.
//! `bulk_insert`와 `create_apps`는 전부 또는 전무로 동작합니다.
//!
//! # 백엔드
//! - [`MemoryStore`]: 프로세스 내 구현
//! - [`SqliteStore`]: 내장 SQLite (앱 이름 UNIQUE, 로그 → 앱 `ON DELETE CASCADE`)

pub mod memory;
pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use logsluice_core::error::StorageError;
use logsluice_core::types::{AppRegistration, LogFilter, LogLevel, LogRecord, LogStats};

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

/// 앱 ID가 해석된 삽입 대기 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertLog {
    pub level: LogLevel,
    pub message: String,
    pub service: String,
    /// 존재하는 앱 ID
    pub app_id: i64,
    /// 해석된 앱 이름
    pub app: String,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub timestamp: DateTime<Utc>,
}

/// 로그 저장소 trait
pub trait LogStore: Send + Sync {
    /// ID로 앱을 조회합니다. 존재하지 않는 ID는 결과에서 빠집니다.
    fn find_apps_by_id(
        &self,
        ids: &[i64],
    ) -> impl Future<Output = Result<Vec<AppRegistration>, StorageError>> + Send;

    /// 이름으로 앱을 조회합니다. 존재하지 않는 이름은 결과에서 빠집니다.
    fn find_apps_by_name(
        &self,
        names: &[String],
    ) -> impl Future<Output = Result<Vec<AppRegistration>, StorageError>> + Send;

    /// 앱을 한 번에 생성합니다.
    ///
    /// 하나라도 이미 존재하면 아무것도 생성하지 않고
    /// [`StorageError::Conflict`]에 충돌한 이름을 담아 반환합니다.
    fn create_apps(
        &self,
        names: &[String],
    ) -> impl Future<Output = Result<Vec<AppRegistration>, StorageError>> + Send;

    /// 설명과 함께 앱 하나를 명시적으로 등록합니다.
    fn register_app(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> impl Future<Output = Result<AppRegistration, StorageError>> + Send;

    /// 앱과 그 앱의 모든 로그를 삭제하고, 삭제된 앱을 반환합니다.
    fn delete_app(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<AppRegistration, StorageError>> + Send;

    /// 앱 목록 (ID 순)
    fn list_apps(
        &self,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<AppRegistration>, StorageError>> + Send;

    /// 레코드를 하나의 트랜잭션으로 저장하고 부여된 ID와 함께 반환합니다.
    ///
    /// 존재하지 않는 `app_id`가 하나라도 있으면 전체가 롤백됩니다.
    fn bulk_insert(
        &self,
        records: Vec<InsertLog>,
    ) -> impl Future<Output = Result<Vec<LogRecord>, StorageError>> + Send;

    /// 필터에 맞는 로그를 저장 순서대로 조회합니다.
    fn query_logs(
        &self,
        filter: &LogFilter,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LogRecord>, StorageError>> + Send;

    /// 필터에 맞는 로그 수
    fn count_logs(
        &self,
        filter: &LogFilter,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// 로그 하나를 삭제하고 삭제된 레코드를 반환합니다.
    fn delete_log(&self, id: i64)
    -> impl Future<Output = Result<LogRecord, StorageError>> + Send;

    /// 레벨별, 서비스별 집계
    fn stats(&self) -> impl Future<Output = Result<LogStats, StorageError>> + Send;

    /// 연결 상태를 확인합니다.
    fn ping(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// 설정으로 선택되는 저장소 백엔드
#[derive(Clone)]
pub enum StoreBackend {
    /// 프로세스 내 저장소
    Memory(MemoryStore),
    /// SQLite
    Sqlite(SqliteStore),
}

impl StoreBackend {
    /// 백엔드 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

impl From<MemoryStore> for StoreBackend {
    fn from(store: MemoryStore) -> Self {
        Self::Memory(store)
    }
}

impl From<SqliteStore> for StoreBackend {
    fn from(store: SqliteStore) -> Self {
        Self::Sqlite(store)
    }
}

macro_rules! delegate {
    ($self:ident, $s:ident => $call:expr) => {
        match $self {
            StoreBackend::Memory($s) => $call.await,
            StoreBackend::Sqlite($s) => $call.await,
        }
    };
}

impl LogStore for StoreBackend {
    async fn find_apps_by_id(&self, ids: &[i64]) -> Result<Vec<AppRegistration>, StorageError> {
        delegate!(self, s => s.find_apps_by_id(ids))
    }

    async fn find_apps_by_name(
        &self,
        names: &[String],
    ) -> Result<Vec<AppRegistration>, StorageError> {
        delegate!(self, s => s.find_apps_by_name(names))
    }

    async fn create_apps(&self, names: &[String]) -> Result<Vec<AppRegistration>, StorageError> {
        delegate!(self, s => s.create_apps(names))
    }

    async fn register_app(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<AppRegistration, StorageError> {
        delegate!(self, s => s.register_app(name, description))
    }

    async fn delete_app(&self, id: i64) -> Result<AppRegistration, StorageError> {
        delegate!(self, s => s.delete_app(id))
    }

    async fn list_apps(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AppRegistration>, StorageError> {
        delegate!(self, s => s.list_apps(offset, limit))
    }

    async fn bulk_insert(&self, records: Vec<InsertLog>) -> Result<Vec<LogRecord>, StorageError> {
        delegate!(self, s => s.bulk_insert(records))
    }

    async fn query_logs(
        &self,
        filter: &LogFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StorageError> {
        delegate!(self, s => s.query_logs(filter, offset, limit))
    }

    async fn count_logs(&self, filter: &LogFilter) -> Result<u64, StorageError> {
        delegate!(self, s => s.count_logs(filter))
    }

    async fn delete_log(&self, id: i64) -> Result<LogRecord, StorageError> {
        delegate!(self, s => s.delete_log(id))
    }

    async fn stats(&self) -> Result<LogStats, StorageError> {
        delegate!(self, s => s.stats())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        delegate!(self, s => s.ping())
    }
}
