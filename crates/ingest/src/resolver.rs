//! 일괄 저장 리졸버 -- 앱 참조 해석과 원자적 일괄 저장
//!
//! 1. 참조된 `app_id`와 앱 이름을 모아 기존 등록을 조회합니다.
//! 2. 등록되지 않은 이름은 한 번에 생성합니다.
//! 3. 레코드마다 최종 `app_id`를 정하고(명시적 `app_id` 우선),
//! 4. 모든 레코드를 하나의 트랜잭션으로 저장합니다.
//!
//! 같은 이름을 동시에 생성하려는 경쟁은 저장소의 UNIQUE 제약이
//! [`StorageError::Conflict`]로 알려주며, 충돌한 이름을 다시 조회한 뒤 재시도합니다.

use std::collections::{BTreeSet, HashMap};

use logsluice_core::error::StorageError;
use logsluice_core::metrics as m;
use logsluice_core::types::{AppRegistration, LogRecord, NewLogRecord};

use crate::error::IngestError;
use crate::store::{InsertLog, LogStore};

/// 앱 생성 충돌 시 최대 시도 횟수
pub const MAX_CREATE_ATTEMPTS: usize = 3;

fn persistence(err: StorageError) -> IngestError {
    IngestError::Persistence(err.to_string())
}

/// 일괄 저장 리졸버
#[derive(Clone)]
pub struct BulkResolver<S> {
    store: S,
}

impl<S: LogStore> BulkResolver<S> {
    /// 저장소로 리졸버를 생성합니다.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// 내부 저장소
    pub fn store(&self) -> &S {
        &self.store
    }

    /// 레코드를 해석하고 하나의 단위로 저장합니다.
    ///
    /// 실패하면 아무것도 저장되지 않은 것으로 취급합니다.
    /// (앱 생성은 레코드 저장과 별개로 커밋될 수 있습니다.)
    pub async fn persist(&self, records: Vec<NewLogRecord>) -> Result<Vec<LogRecord>, IngestError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: BTreeSet<i64> = records.iter().filter_map(|r| r.app.id()).collect();
        let names: BTreeSet<String> = records
            .iter()
            .filter(|r| r.app.id().is_none())
            .filter_map(|r| r.app.name().map(str::to_owned))
            .collect();

        let by_id = self.resolve_ids(&ids).await?;
        let by_name = self.resolve_names(names).await?;

        let inserts = records
            .into_iter()
            .map(|record| {
                let app = match record.app.id() {
                    Some(id) => by_id.get(&id),
                    None => record.app.name().and_then(|name| by_name.get(name)),
                }
                .ok_or_else(|| {
                    IngestError::Persistence(format!("unresolved app reference {:?}", record.app))
                })?;
                Ok(InsertLog {
                    level: record.level,
                    message: record.message,
                    service: record.service,
                    app_id: app.id,
                    app: app.name.clone(),
                    metadata: record.metadata,
                    timestamp: record.timestamp,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let persisted = self.store.bulk_insert(inserts).await.map_err(persistence)?;
        tracing::debug!(count = persisted.len(), "records persisted");
        Ok(persisted)
    }

    async fn resolve_ids(
        &self,
        ids: &BTreeSet<i64>,
    ) -> Result<HashMap<i64, AppRegistration>, IngestError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let wanted: Vec<i64> = ids.iter().copied().collect();
        let found: HashMap<i64, AppRegistration> = self
            .store
            .find_apps_by_id(&wanted)
            .await
            .map_err(persistence)?
            .into_iter()
            .map(|app| (app.id, app))
            .collect();
        if let Some(missing) = wanted.iter().find(|id| !found.contains_key(id)) {
            return Err(IngestError::Persistence(format!("app_id {missing} not found")));
        }
        Ok(found)
    }

    async fn resolve_names(
        &self,
        names: BTreeSet<String>,
    ) -> Result<HashMap<String, AppRegistration>, IngestError> {
        let mut resolved: HashMap<String, AppRegistration> = HashMap::new();
        if names.is_empty() {
            return Ok(resolved);
        }
        let wanted: Vec<String> = names.into_iter().collect();
        for app in self.store.find_apps_by_name(&wanted).await.map_err(persistence)? {
            resolved.insert(app.name.clone(), app);
        }

        let mut missing: Vec<String> = wanted
            .into_iter()
            .filter(|name| !resolved.contains_key(name))
            .collect();
        let mut attempt = 0;
        while !missing.is_empty() {
            attempt += 1;
            match self.store.create_apps(&missing).await {
                Ok(created) => {
                    metrics::counter!(m::RESOLVER_APPS_CREATED_TOTAL).increment(created.len() as u64);
                    for app in created {
                        tracing::info!(app_id = app.id, app = %app.name, "application registered");
                        resolved.insert(app.name.clone(), app);
                    }
                }
                Err(StorageError::Conflict { names }) if attempt < MAX_CREATE_ATTEMPTS => {
                    metrics::counter!(m::RESOLVER_CONFLICT_RETRIES_TOTAL).increment(1);
                    tracing::debug!(?names, attempt, "app name conflict, re-reading");
                    for app in self.store.find_apps_by_name(&names).await.map_err(persistence)? {
                        resolved.insert(app.name.clone(), app);
                    }
                }
                Err(e) => return Err(persistence(e)),
            }
            missing.retain(|name| !resolved.contains_key(name));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use logsluice_core::types::{AppRef, LogFilter, LogLevel, LogStats};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(app: AppRef) -> NewLogRecord {
        NewLogRecord {
            level: LogLevel::Info,
            message: "hello".to_owned(),
            service: "api".to_owned(),
            app,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_input_touches_nothing() {
        let resolver = BulkResolver::new(MemoryStore::new());
        assert!(resolver.persist(Vec::new()).await.unwrap().is_empty());
        assert!(resolver.store().list_apps(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_new_name_in_one_batch_creates_one_app() {
        let resolver = BulkResolver::new(MemoryStore::new());
        let saved = resolver
            .persist(vec![
                record(AppRef::Name("demo".to_owned())),
                record(AppRef::Name("demo".to_owned())),
            ])
            .await
            .unwrap();
        let apps = resolver.store().list_apps(0, 10).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert!(saved.iter().all(|r| r.app_id == apps[0].id && r.app == "demo"));
    }

    #[tokio::test]
    async fn explicit_id_wins_and_stores_registered_name() {
        let store = MemoryStore::new();
        let app = store.register_app("billing", None).await.unwrap();
        let resolver = BulkResolver::new(store);
        let saved = resolver
            .persist(vec![record(AppRef::Both {
                id: app.id,
                name: "typo".to_owned(),
            })])
            .await
            .unwrap();
        assert_eq!(saved[0].app_id, app.id);
        assert_eq!(saved[0].app, "billing");
        // 이름 참조는 무시되므로 새 앱이 생기지 않음
        assert_eq!(resolver.store().list_apps(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_fails_whole_batch() {
        let resolver = BulkResolver::new(MemoryStore::new());
        let err = resolver
            .persist(vec![
                record(AppRef::Name("demo".to_owned())),
                record(AppRef::Id(42)),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "persistence error: app_id 42 not found");
        assert_eq!(
            resolver
                .store()
                .count_logs(&LogFilter::default())
                .await
                .unwrap(),
            0
        );
    }

    /// 첫 `create_apps` 직전에 다른 프로세스가 같은 이름을 만든 것처럼 동작하는 저장소
    #[derive(Clone)]
    struct RacingStore {
        inner: MemoryStore,
        creates: Arc<AtomicUsize>,
    }

    impl LogStore for RacingStore {
        async fn find_apps_by_id(&self, ids: &[i64]) -> Result<Vec<AppRegistration>, StorageError> {
            self.inner.find_apps_by_id(ids).await
        }
        async fn find_apps_by_name(
            &self,
            names: &[String],
        ) -> Result<Vec<AppRegistration>, StorageError> {
            self.inner.find_apps_by_name(names).await
        }
        async fn create_apps(&self, names: &[String]) -> Result<Vec<AppRegistration>, StorageError> {
            if self.creates.fetch_add(1, Ordering::SeqCst) == 0 {
                self.inner.register_app(&names[0], Some("winner")).await?;
            }
            self.inner.create_apps(names).await
        }
        async fn register_app(
            &self,
            name: &str,
            description: Option<&str>,
        ) -> Result<AppRegistration, StorageError> {
            self.inner.register_app(name, description).await
        }
        async fn delete_app(&self, id: i64) -> Result<AppRegistration, StorageError> {
            self.inner.delete_app(id).await
        }
        async fn list_apps(
            &self,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<AppRegistration>, StorageError> {
            self.inner.list_apps(offset, limit).await
        }
        async fn bulk_insert(&self, records: Vec<InsertLog>) -> Result<Vec<LogRecord>, StorageError> {
            self.inner.bulk_insert(records).await
        }
        async fn query_logs(
            &self,
            filter: &LogFilter,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<LogRecord>, StorageError> {
            self.inner.query_logs(filter, offset, limit).await
        }
        async fn count_logs(&self, filter: &LogFilter) -> Result<u64, StorageError> {
            self.inner.count_logs(filter).await
        }
        async fn delete_log(&self, id: i64) -> Result<LogRecord, StorageError> {
            self.inner.delete_log(id).await
        }
        async fn stats(&self) -> Result<LogStats, StorageError> {
            self.inner.stats().await
        }
        async fn ping(&self) -> Result<(), StorageError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn name_race_reuses_winner_registration() {
        let store = RacingStore {
            inner: MemoryStore::new(),
            creates: Arc::new(AtomicUsize::new(0)),
        };
        let resolver = BulkResolver::new(store.clone());
        let saved = resolver
            .persist(vec![
                record(AppRef::Name("alpha".to_owned())),
                record(AppRef::Name("beta".to_owned())),
            ])
            .await
            .unwrap();

        let apps = store.list_apps(0, 10).await.unwrap();
        assert_eq!(apps.len(), 2);
        let alpha = apps.iter().find(|a| a.name == "alpha").unwrap();
        assert_eq!(alpha.description.as_deref(), Some("winner"));
        assert_eq!(saved[0].app_id, alpha.id);
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);
    }
}
