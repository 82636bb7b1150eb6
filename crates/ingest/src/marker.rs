//! 알림 중복 방지 마커 저장소
//!
//! 마커는 "이미 발송됨"을 뜻하며 TTL이 지나면 스스로 사라집니다.
//! 설정은 원자적 set-if-absent-with-expiry 하나로 이루어지므로
//! 경쟁하는 두 평가기가 동시에 발송할 수 없습니다.
//!
//! - [`MemoryMarkerStore`]: 프로세스 내 맵 (단일 프로세스에서만 중복 방지)
//! - [`RedisMarkerStore`]: `SET alert:lock:<key> 1 NX EX <ttl>`
//! - [`FallbackMarkerStore`]: 공유 저장소 장애 시 프로세스 내 맵으로 저하

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::time::Instant;

use logsluice_core::metrics as m;

use crate::error::IngestError;

/// 마커 키 접두사
pub const MARKER_PREFIX: &str = "alert:lock:";

/// 규칙 키에 대한 마커 키
pub fn marker_key(rule_key: &str) -> String {
    format!("{MARKER_PREFIX}{rule_key}")
}

/// 마커 저장소 trait
pub trait MarkerStore: Send + Sync {
    /// 마커가 없으면 `ttl`로 설정하고 `true`를 반환합니다.
    /// 이미 살아 있는 마커가 있으면 `false`를 반환합니다.
    fn try_acquire(
        &self,
        rule_key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, IngestError>> + Send;

    /// 공유 저장소 대신 프로세스 내 맵을 사용 중인지 여부
    fn is_degraded(&self) -> bool {
        false
    }
}

/// 프로세스 내 마커 저장소
#[derive(Clone, Default)]
pub struct MemoryMarkerStore {
    markers: Arc<Mutex<HashMap<String, Instant>>>,
}

impl MemoryMarkerStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_now(&self, rule_key: &str, ttl: Duration) -> Result<bool, IngestError> {
        let mut markers = self
            .markers
            .lock()
            .map_err(|_| IngestError::Marker("marker map lock poisoned".to_owned()))?;
        let now = Instant::now();
        markers.retain(|_, expires| *expires > now);
        let key = marker_key(rule_key);
        if markers.contains_key(&key) {
            return Ok(false);
        }
        markers.insert(key, now + ttl);
        Ok(true)
    }

    /// 살아 있는 마커가 있는지 확인합니다.
    fn is_live(&self, rule_key: &str) -> Result<bool, IngestError> {
        let markers = self
            .markers
            .lock()
            .map_err(|_| IngestError::Marker("marker map lock poisoned".to_owned()))?;
        Ok(markers
            .get(&marker_key(rule_key))
            .is_some_and(|expires| *expires > Instant::now()))
    }
}

impl MarkerStore for MemoryMarkerStore {
    async fn try_acquire(&self, rule_key: &str, ttl: Duration) -> Result<bool, IngestError> {
        self.acquire_now(rule_key, ttl)
    }
}

/// Redis 마커 저장소
///
/// 큐와 같은 Redis 키 공간을 공유합니다.
#[derive(Clone)]
pub struct RedisMarkerStore {
    client: redis::Client,
    conn: Arc<tokio::sync::Mutex<Option<MultiplexedConnection>>>,
}

impl RedisMarkerStore {
    /// Redis URL로 저장소를 생성합니다. 연결은 첫 명령 시점에 맺습니다.
    pub fn open(url: &str) -> Result<Self, IngestError> {
        let client = redis::Client::open(url).map_err(|e| IngestError::Marker(e.to_string()))?;
        Ok(Self::from_client(client))
    }

    /// 기존 클라이언트로 저장소를 생성합니다.
    pub fn from_client(client: redis::Client) -> Self {
        Self {
            client,
            conn: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, IngestError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| IngestError::Marker(e.to_string()))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self, err: redis::RedisError) -> IngestError {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            *self.conn.lock().await = None;
        }
        IngestError::Marker(err.to_string())
    }
}

impl MarkerStore for RedisMarkerStore {
    async fn try_acquire(&self, rule_key: &str, ttl: Duration) -> Result<bool, IngestError> {
        let mut conn = self.connection().await?;
        let reply: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(marker_key(rule_key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;
        match reply {
            Ok(set) => Ok(set.is_some()),
            Err(e) => Err(self.reset(e).await),
        }
    }
}

/// 공유 저장소 장애 시 프로세스 내 맵으로 저하되는 마커 저장소
///
/// 매 호출마다 공유 저장소를 먼저 시도하므로 복구되면 자동으로 돌아갑니다.
/// 저하 중 로컬 맵에 설정된 마커는 복구 후에도 만료 전까지 발송을 막습니다.
#[derive(Clone)]
pub struct FallbackMarkerStore<P> {
    primary: P,
    local: MemoryMarkerStore,
    degraded: Arc<AtomicBool>,
}

impl<P: MarkerStore> FallbackMarkerStore<P> {
    /// 공유 저장소를 감쌉니다.
    pub fn new(primary: P) -> Self {
        Self {
            primary,
            local: MemoryMarkerStore::new(),
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    fn mark_degraded(&self, error: &IngestError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                error = %error,
                "shared marker store unavailable, deduplicating in-process only"
            );
            metrics::gauge!(m::ALERT_MARKER_DEGRADED).set(1.0);
        }
    }

    fn mark_recovered(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            tracing::info!("shared marker store recovered");
            metrics::gauge!(m::ALERT_MARKER_DEGRADED).set(0.0);
        }
    }
}

impl<P: MarkerStore> MarkerStore for FallbackMarkerStore<P> {
    async fn try_acquire(&self, rule_key: &str, ttl: Duration) -> Result<bool, IngestError> {
        match self.primary.try_acquire(rule_key, ttl).await {
            Ok(acquired) => {
                self.mark_recovered();
                Ok(acquired && !self.local.is_live(rule_key)?)
            }
            Err(e) => {
                self.mark_degraded(&e);
                self.local.try_acquire(rule_key, ttl).await
            }
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// 설정으로 선택되는 마커 저장소
#[derive(Clone)]
pub enum MarkerBackend {
    /// 프로세스 내 맵
    Memory(MemoryMarkerStore),
    /// Redis (프로세스 내 맵으로 저하 가능)
    Redis(FallbackMarkerStore<RedisMarkerStore>),
}

impl MarkerBackend {
    /// 백엔드 종류 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

impl MarkerStore for MarkerBackend {
    async fn try_acquire(&self, rule_key: &str, ttl: Duration) -> Result<bool, IngestError> {
        match self {
            Self::Memory(store) => store.try_acquire(rule_key, ttl).await,
            Self::Redis(store) => store.try_acquire(rule_key, ttl).await,
        }
    }

    fn is_degraded(&self) -> bool {
        match self {
            Self::Memory(_) => false,
            Self::Redis(store) => store.is_degraded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_marker_is_set_once_until_expiry() {
        let store = MemoryMarkerStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.try_acquire("ERROR", ttl).await.unwrap());
        assert!(!store.try_acquire("ERROR", ttl).await.unwrap());
        assert!(store.is_live("ERROR").unwrap());
        // 다른 규칙은 독립적
        assert!(store.try_acquire("api", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.is_live("ERROR").unwrap());
        assert!(store.try_acquire("ERROR", ttl).await.unwrap());
    }

    #[test]
    fn marker_key_uses_lock_namespace() {
        assert_eq!(marker_key("ERROR"), "alert:lock:ERROR");
    }

    /// 호출 횟수까지 실패하는 공유 저장소
    struct FlakyStore {
        failures_left: std::sync::atomic::AtomicUsize,
        inner: MemoryMarkerStore,
    }

    impl MarkerStore for FlakyStore {
        async fn try_acquire(&self, rule_key: &str, ttl: Duration) -> Result<bool, IngestError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(IngestError::Marker("connection refused".to_owned()));
            }
            self.inner.try_acquire(rule_key, ttl).await
        }
    }

    fn flaky(failures: usize) -> FallbackMarkerStore<FlakyStore> {
        FallbackMarkerStore::new(FlakyStore {
            failures_left: std::sync::atomic::AtomicUsize::new(failures),
            inner: MemoryMarkerStore::new(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_degrades_then_recovers() {
        let store = flaky(2);
        let ttl = Duration::from_secs(60);

        assert!(store.try_acquire("ERROR", ttl).await.unwrap());
        assert!(store.is_degraded());
        // 로컬 맵이 중복 발송을 막음
        assert!(!store.try_acquire("ERROR", ttl).await.unwrap());

        // 공유 저장소 복구: 로컬 마커가 살아 있는 동안은 발송하지 않음
        assert!(!store.try_acquire("ERROR", ttl).await.unwrap());
        assert!(!store.is_degraded());
        // 저하 중 마커가 없던 규칙은 바로 발송
        assert!(store.try_acquire("api", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn rule_fires_again_after_local_marker_expires() {
        let store = flaky(1);
        let ttl = Duration::from_secs(60);

        assert!(store.try_acquire("ERROR", ttl).await.unwrap());
        assert!(store.is_degraded());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.try_acquire("ERROR", ttl).await.unwrap());
        assert!(!store.is_degraded());
        assert!(!store.try_acquire("ERROR", ttl).await.unwrap());
    }

    #[test]
    fn redis_store_rejects_invalid_url() {
        assert!(RedisMarkerStore::open("not a url").is_err());
    }
}
