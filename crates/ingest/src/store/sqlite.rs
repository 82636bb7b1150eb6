//! SQLite 저장소 구현
//!
//! 모든 호출은 `spawn_blocking` 위에서 단일 연결을 잠그고 실행됩니다.
//! 타임스탬프는 고정 폭 RFC 3339 (마이크로초, `Z`) 문자열로 저장되어
//! 문자열 비교가 시간 순서와 일치합니다.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};

use logsluice_core::error::StorageError;
use logsluice_core::types::{AppRegistration, LogFilter, LogLevel, LogRecord, LogStats};

use super::{InsertLog, LogStore};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS apps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT
);
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level TEXT NOT NULL,
    service TEXT NOT NULL,
    message TEXT NOT NULL,
    metadata TEXT,
    timestamp TEXT NOT NULL,
    app_id INTEGER NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
    app TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
CREATE INDEX IF NOT EXISTS idx_logs_service ON logs(service);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_logs_app_id ON logs(app_id);
CREATE INDEX IF NOT EXISTS idx_logs_app ON logs(app);
";

const LOG_COLUMNS: &str = "id, level, message, service, app_id, app, metadata, timestamp";

/// SQLite 저장소
///
/// 복제는 같은 연결을 공유합니다.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 파일 데이터베이스를 열고 스키마를 생성합니다.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Connection(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(connection_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(connection_err)?;
        tracing::info!(path = %path.display(), "sqlite store opened");
        Self::with_connection(conn)
    }

    /// 메모리 데이터베이스를 엽니다.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory().map_err(connection_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA).map_err(connection_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Connection(format!("spawn_blocking failed: {e}")))?
    }
}

fn connection_err(err: rusqlite::Error) -> StorageError {
    StorageError::Connection(err.to_string())
}

fn query_err(err: rusqlite::Error) -> StorageError {
    StorageError::Query(err.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::Query(format!("invalid stored timestamp '{raw}': {e}")))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn row_to_app(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppRegistration> {
    Ok(AppRegistration {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

/// 행에서 읽은 변환 전 로그
struct RawLog {
    id: i64,
    level: String,
    message: String,
    service: String,
    app_id: i64,
    app: String,
    metadata: Option<String>,
    timestamp: String,
}

impl RawLog {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            level: row.get(1)?,
            message: row.get(2)?,
            service: row.get(3)?,
            app_id: row.get(4)?,
            app: row.get(5)?,
            metadata: row.get(6)?,
            timestamp: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<LogRecord, StorageError> {
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StorageError::Query(format!("invalid stored metadata: {e}")))?;
        Ok(LogRecord {
            id: self.id,
            level: LogLevel::parse(&self.level),
            message: self.message,
            service: self.service,
            app_id: self.app_id,
            app: self.app,
            metadata,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

/// 필터를 WHERE 절과 바인딩 값으로 변환합니다.
fn filter_clause(filter: &LogFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    if let Some(level) = &filter.level {
        conditions.push("level = ?");
        values.push(Value::Text(level.as_str().to_owned()));
    }
    if let Some(service) = &filter.service {
        conditions.push("service = ?");
        values.push(Value::Text(service.clone()));
    }
    if let Some(app) = &filter.app {
        conditions.push("app = ?");
        values.push(Value::Text(app.clone()));
    }
    if let Some(app_id) = filter.app_id {
        conditions.push("app_id = ?");
        values.push(Value::Integer(app_id));
    }
    if let Some(since) = &filter.since {
        conditions.push("timestamp >= ?");
        values.push(Value::Text(format_timestamp(since)));
    }
    if let Some(until) = &filter.until {
        conditions.push("timestamp < ?");
        values.push(Value::Text(format_timestamp(until)));
    }
    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, values)
}

fn select_apps(
    conn: &Connection,
    column: &str,
    values: Vec<Value>,
) -> Result<Vec<AppRegistration>, StorageError> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, name, description FROM apps WHERE {column} IN ({}) ORDER BY id",
        placeholders(values.len())
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), row_to_app)
        .map_err(query_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
}

fn to_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl LogStore for SqliteStore {
    async fn find_apps_by_id(&self, ids: &[i64]) -> Result<Vec<AppRegistration>, StorageError> {
        let values: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();
        self.run(move |conn| select_apps(conn, "id", values)).await
    }

    async fn find_apps_by_name(
        &self,
        names: &[String],
    ) -> Result<Vec<AppRegistration>, StorageError> {
        let values: Vec<Value> = names.iter().cloned().map(Value::Text).collect();
        self.run(move |conn| select_apps(conn, "name", values)).await
    }

    async fn create_apps(&self, names: &[String]) -> Result<Vec<AppRegistration>, StorageError> {
        let mut names = names.to_vec();
        names.sort();
        names.dedup();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(query_err)?;
            let existing = select_apps(&tx, "name", names.iter().cloned().map(Value::Text).collect())?;
            if !existing.is_empty() {
                return Err(StorageError::Conflict {
                    names: existing.into_iter().map(|app| app.name).collect(),
                });
            }
            let mut created = Vec::with_capacity(names.len());
            {
                let mut stmt = tx
                    .prepare("INSERT INTO apps (name, description) VALUES (?1, NULL)")
                    .map_err(query_err)?;
                for name in &names {
                    stmt.execute(params![name]).map_err(|e| {
                        if is_unique_violation(&e) {
                            StorageError::Conflict {
                                names: vec![name.clone()],
                            }
                        } else {
                            query_err(e)
                        }
                    })?;
                    created.push(AppRegistration {
                        id: tx.last_insert_rowid(),
                        name: name.clone(),
                        description: None,
                    });
                }
            }
            tx.commit().map_err(query_err)?;
            Ok(created)
        })
        .await
    }

    async fn register_app(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<AppRegistration, StorageError> {
        let name = name.to_owned();
        let description = description.map(str::to_owned);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO apps (name, description) VALUES (?1, ?2)",
                params![name, description],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Conflict {
                        names: vec![name.clone()],
                    }
                } else {
                    query_err(e)
                }
            })?;
            Ok(AppRegistration {
                id: conn.last_insert_rowid(),
                name,
                description,
            })
        })
        .await
    }

    async fn delete_app(&self, id: i64) -> Result<AppRegistration, StorageError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(query_err)?;
            let app = tx
                .query_row(
                    "SELECT id, name, description FROM apps WHERE id = ?1",
                    params![id],
                    row_to_app,
                )
                .optional()
                .map_err(query_err)?
                .ok_or_else(|| StorageError::NotFound(format!("app {id}")))?;
            tx.execute("DELETE FROM apps WHERE id = ?1", params![id])
                .map_err(query_err)?;
            tx.commit().map_err(query_err)?;
            Ok(app)
        })
        .await
    }

    async fn list_apps(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AppRegistration>, StorageError> {
        self.run(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, description FROM apps ORDER BY id LIMIT ?1 OFFSET ?2")
                .map_err(query_err)?;
            let rows = stmt
                .query_map(params![to_limit(limit), to_limit(offset)], row_to_app)
                .map_err(query_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
        })
        .await
    }

    async fn bulk_insert(&self, records: Vec<InsertLog>) -> Result<Vec<LogRecord>, StorageError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(query_err)?;
            let mut persisted = Vec::with_capacity(records.len());
            {
                let mut exists = tx
                    .prepare("SELECT 1 FROM apps WHERE id = ?1")
                    .map_err(query_err)?;
                let mut insert = tx
                    .prepare(
                        "INSERT INTO logs (level, service, message, metadata, timestamp, app_id, app)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    )
                    .map_err(query_err)?;
                for record in records {
                    if !exists.exists(params![record.app_id]).map_err(query_err)? {
                        // tx는 drop 시 롤백
                        return Err(StorageError::NotFound(format!("app {}", record.app_id)));
                    }
                    let metadata = record
                        .metadata
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()
                        .map_err(|e| StorageError::Query(format!("metadata encode: {e}")))?;
                    insert
                        .execute(params![
                            record.level.as_str(),
                            record.service,
                            record.message,
                            metadata,
                            format_timestamp(&record.timestamp),
                            record.app_id,
                            record.app,
                        ])
                        .map_err(query_err)?;
                    persisted.push(LogRecord {
                        id: tx.last_insert_rowid(),
                        level: record.level,
                        message: record.message,
                        service: record.service,
                        app_id: record.app_id,
                        app: record.app,
                        metadata: record.metadata,
                        timestamp: record.timestamp,
                    });
                }
            }
            tx.commit().map_err(query_err)?;
            Ok(persisted)
        })
        .await
    }

    async fn query_logs(
        &self,
        filter: &LogFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let (clause, mut values) = filter_clause(filter);
        values.push(Value::Integer(to_limit(limit)));
        values.push(Value::Integer(to_limit(offset)));
        self.run(move |conn| {
            let sql = format!("SELECT {LOG_COLUMNS} FROM logs{clause} ORDER BY id LIMIT ? OFFSET ?");
            let mut stmt = conn.prepare(&sql).map_err(query_err)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), RawLog::from_row)
                .map_err(query_err)?;
            rows.map(|row| row.map_err(query_err)?.into_record())
                .collect()
        })
        .await
    }

    async fn count_logs(&self, filter: &LogFilter) -> Result<u64, StorageError> {
        let (clause, values) = filter_clause(filter);
        self.run(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM logs{clause}");
            let count: i64 = conn
                .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
                .map_err(query_err)?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn delete_log(&self, id: i64) -> Result<LogRecord, StorageError> {
        self.run(move |conn| {
            let sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE id = ?1");
            let raw = conn
                .query_row(&sql, params![id], RawLog::from_row)
                .optional()
                .map_err(query_err)?
                .ok_or_else(|| StorageError::NotFound(format!("log {id}")))?;
            conn.execute("DELETE FROM logs WHERE id = ?1", params![id])
                .map_err(query_err)?;
            raw.into_record()
        })
        .await
    }

    async fn stats(&self) -> Result<LogStats, StorageError> {
        self.run(|conn| {
            let group_count = |column: &str| -> Result<Vec<(String, i64)>, StorageError> {
                let sql = format!("SELECT {column}, COUNT(*) FROM logs GROUP BY {column}");
                let mut stmt = conn.prepare(&sql).map_err(query_err)?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(query_err)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
            };
            let mut stats = LogStats::default();
            for (level, count) in group_count("level")? {
                let count = count.max(0) as u64;
                stats.total += count;
                stats.by_level.insert(level, count);
            }
            for (service, count) in group_count("service")? {
                stats.by_service.insert(service, count.max(0) as u64);
            }
            Ok(stats)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(connection_err)
        })
        .await
    }
}
