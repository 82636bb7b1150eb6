//! Redis Streams 큐 구현
//!
//! 스트림 하나가 큐 하나에 대응합니다. 컨슈머 그룹과 pending 집합은
//! Redis가 관리하므로 여러 프로세스의 워커가 같은 그룹을 공유할 수 있습니다.
//!
//! 블로킹 `XREADGROUP`은 `XADD`/`XACK`과 별도의 멀티플렉스 연결을 사용합니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingReply, StreamRangeReply,
    StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisError, RedisResult};
use tokio::sync::Mutex;

use logsluice_core::error::QueueError;
use logsluice_core::types::EntryId;

use super::{DurableQueue, Fields, QueueEntry, StartPosition};

type ConnectionSlot = Arc<Mutex<Option<MultiplexedConnection>>>;

/// Redis Streams 기반 큐
///
/// 연결은 첫 명령 시점에 맺으며, 연결 계열 에러가 나면 버리고 다음 호출에서 다시 맺습니다.
#[derive(Clone)]
pub struct RedisStreamQueue {
    client: redis::Client,
    stream: String,
    conn: ConnectionSlot,
    blocking_conn: ConnectionSlot,
}

impl RedisStreamQueue {
    /// Redis URL과 스트림 이름으로 큐를 생성합니다.
    ///
    /// URL 형식만 검사하며 실제 연결은 하지 않습니다.
    pub fn open(url: &str, stream: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        Ok(Self {
            client,
            stream: stream.into(),
            conn: Arc::new(Mutex::new(None)),
            blocking_conn: Arc::new(Mutex::new(None)),
        })
    }

    /// 같은 Redis 연결을 공유하는 다른 스트림의 큐를 만듭니다.
    pub fn with_stream(&self, stream: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            stream: stream.into(),
            conn: Arc::clone(&self.conn),
            blocking_conn: Arc::new(Mutex::new(None)),
        }
    }

    /// 공유 Redis 클라이언트
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    async fn connection(&self, slot: &ConnectionSlot) -> Result<MultiplexedConnection, QueueError> {
        let mut guard = slot.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        tracing::debug!(stream = %self.stream, "redis connection established");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn finish<T>(
        &self,
        slot: &ConnectionSlot,
        group: Option<&str>,
        result: RedisResult<T>,
    ) -> Result<T, QueueError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let mapped = match group {
                    Some(group) if is_missing_group(&err) => QueueError::GroupNotFound {
                        group: group.to_owned(),
                    },
                    _ => map_redis_error(err),
                };
                if mapped.is_unavailable() {
                    *slot.lock().await = None;
                }
                Err(mapped)
            }
        }
    }

    async fn read_group(
        &self,
        slot: &ConnectionSlot,
        group: &str,
        id: &str,
        options: StreamReadOptions,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut conn = self.connection(slot).await?;
        let result: RedisResult<Option<StreamReadReply>> = conn
            .xread_options(&[self.stream.as_str()], &[id], &options)
            .await;
        let reply = self.finish(slot, Some(group), result).await?;
        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for stream_id in key.ids {
                entries.push(entry_from_stream_id(stream_id)?);
            }
        }
        Ok(entries)
    }
}

impl DurableQueue for RedisStreamQueue {
    fn name(&self) -> &str {
        &self.stream
    }

    async fn enqueue(&self, fields: Fields) -> Result<EntryId, QueueError> {
        let mut conn = self.connection(&self.conn).await?;
        let items = field_pairs(&fields);
        let result: RedisResult<String> = conn.xadd(&self.stream, "*", &items).await;
        let id = self.finish(&self.conn, None, result).await?;
        id.parse()
    }

    async fn enqueue_batch(&self, batch: Vec<Fields>) -> Result<Vec<EntryId>, QueueError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection(&self.conn).await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for fields in &batch {
            pipe.xadd(&self.stream, "*", &field_pairs(fields));
        }
        let result: RedisResult<Vec<String>> = pipe.query_async(&mut conn).await;
        let ids = self.finish(&self.conn, None, result).await?;
        ids.iter().map(|id| id.parse()).collect()
    }

    async fn ensure_group(&self, group: &str, start: StartPosition) -> Result<(), QueueError> {
        let mut conn = self.connection(&self.conn).await?;
        let start_id = match start {
            StartPosition::New => "$",
            StartPosition::Beginning => "0",
        };
        let result: RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream, group, start_id)
            .await;
        match result {
            Ok(()) => {
                tracing::info!(stream = %self.stream, group, start = start_id, "consumer group created");
                Ok(())
            }
            Err(err) if is_group_exists(&err) => Ok(()),
            Err(err) => self.finish(&self.conn, None, Err(err)).await,
        }
    }

    async fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(limit);
        self.read_group(&self.conn, group, "0", options).await
    }

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
        block: Duration,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(limit);
        // BLOCK 0은 Redis에서 무한 대기이므로 0이면 옵션을 생략
        if block.is_zero() {
            self.read_group(&self.conn, group, ">", options).await
        } else {
            options = options.block(block.as_millis() as usize);
            self.read_group(&self.blocking_conn, group, ">", options)
                .await
        }
    }

    async fn claim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let min_idle_ms = min_idle.as_millis() as usize;
        let mut conn = self.connection(&self.conn).await?;
        // 자기 자신의 엔트리를 걸러내므로 넉넉히 조회
        let scan = limit.saturating_mul(4).max(limit);
        let result: RedisResult<StreamPendingCountReply> = conn
            .xpending_count(&self.stream, group, "-", "+", scan)
            .await;
        let pending = self.finish(&self.conn, Some(group), result).await?;

        let ids: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.consumer != consumer && p.last_delivered_ms >= min_idle_ms)
            .take(limit)
            .map(|p| p.id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let result: RedisResult<StreamClaimReply> = conn
            .xclaim(&self.stream, group, consumer, min_idle_ms, &ids)
            .await;
        let claimed = self.finish(&self.conn, Some(group), result).await?;
        tracing::debug!(
            stream = %self.stream,
            group,
            consumer,
            claimed = claimed.ids.len(),
            "claimed idle pending entries"
        );
        claimed.ids.into_iter().map(entry_from_stream_id).collect()
    }

    async fn ack(&self, group: &str, ids: &[EntryId]) -> Result<usize, QueueError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection(&self.conn).await?;
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let result: RedisResult<usize> = conn.xack(&self.stream, group, &ids).await;
        self.finish(&self.conn, None, result).await
    }

    async fn range(
        &self,
        after: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut conn = self.connection(&self.conn).await?;
        // "(" 접두어는 배타적 시작 경계
        let start = after.map_or_else(|| "-".to_owned(), |id| format!("({id}"));
        let result: RedisResult<StreamRangeReply> = conn
            .xrange_count(&self.stream, start, "+", limit)
            .await;
        let reply = self.finish(&self.conn, None, result).await?;
        reply.ids.into_iter().map(entry_from_stream_id).collect()
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection(&self.conn).await?;
        let result: RedisResult<usize> = conn.xlen(&self.stream).await;
        self.finish(&self.conn, None, result).await
    }

    async fn pending_count(&self, group: &str) -> Result<usize, QueueError> {
        let mut conn = self.connection(&self.conn).await?;
        let result: RedisResult<StreamPendingReply> = conn.xpending(&self.stream, group).await;
        let reply = self.finish(&self.conn, Some(group), result).await?;
        Ok(reply.count())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.connection(&self.conn).await?;
        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        self.finish(&self.conn, None, result).await.map(|_| ())
    }
}

fn field_pairs(fields: &Fields) -> Vec<(&str, &str)> {
    fields
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

/// Redis 스트림 엔트리를 큐 엔트리로 변환합니다.
///
/// 문자열로 해석할 수 없는 필드 값은 건너뜁니다.
pub(crate) fn entry_from_stream_id(stream_id: StreamId) -> Result<QueueEntry, QueueError> {
    let id: EntryId = stream_id.id.parse()?;
    let fields = stream_fields(stream_id.map);
    Ok(QueueEntry { id, fields })
}

fn stream_fields(map: HashMap<String, redis::Value>) -> Fields {
    map.into_iter()
        .filter_map(|(key, value)| {
            let value: RedisResult<String> = redis::from_redis_value(&value);
            value.ok().map(|v| (key, v))
        })
        .collect()
}

/// 연결 계열 에러는 `Unavailable`, 그 외는 `Backend`로 변환합니다.
pub(crate) fn map_redis_error(err: RedisError) -> QueueError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.is_connection_dropped()
    {
        QueueError::Unavailable(err.to_string())
    } else {
        QueueError::Backend(err.to_string())
    }
}

fn is_group_exists(err: &RedisError) -> bool {
    err.code() == Some("BUSYGROUP")
}

fn is_missing_group(err: &RedisError) -> bool {
    err.code() == Some("NOGROUP")
}
