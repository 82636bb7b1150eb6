//! 프로세스 내 저장소 구현

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use logsluice_core::error::StorageError;
use logsluice_core::types::{AppRegistration, LogFilter, LogRecord, LogStats};

use super::{InsertLog, LogStore};

#[derive(Debug, Default)]
struct State {
    apps: BTreeMap<i64, AppRegistration>,
    logs: BTreeMap<i64, LogRecord>,
    next_app_id: i64,
    next_log_id: i64,
}

impl State {
    fn app_by_name(&self, name: &str) -> Option<&AppRegistration> {
        self.apps.values().find(|app| app.name == name)
    }

    fn insert_app(&mut self, name: &str, description: Option<&str>) -> AppRegistration {
        self.next_app_id += 1;
        let app = AppRegistration {
            id: self.next_app_id,
            name: name.to_owned(),
            description: description.map(str::to_owned),
        };
        self.apps.insert(app.id, app.clone());
        app
    }
}

/// 프로세스 내 저장소
///
/// 복제는 같은 저장소를 가리키는 핸들을 만듭니다.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Connection("memory store lock poisoned".to_owned()))
    }
}

impl LogStore for MemoryStore {
    async fn find_apps_by_id(&self, ids: &[i64]) -> Result<Vec<AppRegistration>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .apps
            .values()
            .filter(|app| ids.contains(&app.id))
            .cloned()
            .collect())
    }

    async fn find_apps_by_name(
        &self,
        names: &[String],
    ) -> Result<Vec<AppRegistration>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .apps
            .values()
            .filter(|app| names.contains(&app.name))
            .cloned()
            .collect())
    }

    async fn create_apps(&self, names: &[String]) -> Result<Vec<AppRegistration>, StorageError> {
        let mut state = self.lock()?;
        let conflicts: Vec<String> = names
            .iter()
            .filter(|name| state.app_by_name(name).is_some())
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Err(StorageError::Conflict { names: conflicts });
        }
        let mut created: Vec<AppRegistration> = Vec::with_capacity(names.len());
        for name in names {
            if created.iter().any(|app| &app.name == name) {
                continue;
            }
            created.push(state.insert_app(name, None));
        }
        Ok(created)
    }

    async fn register_app(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<AppRegistration, StorageError> {
        let mut state = self.lock()?;
        if state.app_by_name(name).is_some() {
            return Err(StorageError::Conflict {
                names: vec![name.to_owned()],
            });
        }
        Ok(state.insert_app(name, description))
    }

    async fn delete_app(&self, id: i64) -> Result<AppRegistration, StorageError> {
        let mut state = self.lock()?;
        let app = state
            .apps
            .remove(&id)
            .ok_or_else(|| StorageError::NotFound(format!("app {id}")))?;
        state.logs.retain(|_, log| log.app_id != id);
        Ok(app)
    }

    async fn list_apps(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AppRegistration>, StorageError> {
        let state = self.lock()?;
        Ok(state.apps.values().skip(offset).take(limit).cloned().collect())
    }

    async fn bulk_insert(&self, records: Vec<InsertLog>) -> Result<Vec<LogRecord>, StorageError> {
        let mut state = self.lock()?;
        if let Some(missing) = records.iter().find(|r| !state.apps.contains_key(&r.app_id)) {
            return Err(StorageError::NotFound(format!("app {}", missing.app_id)));
        }
        let mut persisted = Vec::with_capacity(records.len());
        for record in records {
            state.next_log_id += 1;
            let log = LogRecord {
                id: state.next_log_id,
                level: record.level,
                message: record.message,
                service: record.service,
                app_id: record.app_id,
                app: record.app,
                metadata: record.metadata,
                timestamp: record.timestamp,
            };
            state.logs.insert(log.id, log.clone());
            persisted.push(log);
        }
        Ok(persisted)
    }

    async fn query_logs(
        &self,
        filter: &LogFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .logs
            .values()
            .filter(|log| filter.matches(log))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_logs(&self, filter: &LogFilter) -> Result<u64, StorageError> {
        let state = self.lock()?;
        Ok(state.logs.values().filter(|log| filter.matches(log)).count() as u64)
    }

    async fn delete_log(&self, id: i64) -> Result<LogRecord, StorageError> {
        self.lock()?
            .logs
            .remove(&id)
            .ok_or_else(|| StorageError::NotFound(format!("log {id}")))
    }

    async fn stats(&self) -> Result<LogStats, StorageError> {
        let state = self.lock()?;
        let mut stats = LogStats::default();
        for log in state.logs.values() {
            stats.total += 1;
            *stats.by_level.entry(log.level.to_string()).or_default() += 1;
            *stats.by_service.entry(log.service.clone()).or_default() += 1;
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.lock().map(|_| ())
    }
}
