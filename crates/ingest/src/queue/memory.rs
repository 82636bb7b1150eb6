//! 프로세스 내 큐 구현
//!
//! 엔트리, 컨슈머 그룹, pending 집합을 하나의 `std::sync::Mutex` 안에 보관합니다.
//! 락은 `.await` 지점을 넘어 유지되지 않으며, 블로킹 읽기는 `Notify`로 깨어납니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;
use tokio::time::Instant;

use logsluice_core::error::QueueError;
use logsluice_core::types::EntryId;

use super::{DurableQueue, Fields, QueueEntry, StartPosition};

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&mut self) -> EntryId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let id = if now_ms > self.last_id.millis {
            EntryId::new(now_ms, 0)
        } else {
            self.last_id.next()
        };
        self.last_id = id;
        id
    }

    fn group_mut(&mut self, group: &str) -> Result<&mut GroupState, QueueError> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| QueueError::GroupNotFound {
                group: group.to_owned(),
            })
    }

    fn entry(&self, id: EntryId) -> QueueEntry {
        QueueEntry {
            id,
            fields: self.entries.get(&id).cloned().unwrap_or_default(),
        }
    }
}

struct Inner {
    name: String,
    state: Mutex<StreamState>,
    appended: Notify,
}

/// 프로세스 내 큐
///
/// 복제는 같은 큐를 가리키는 핸들을 만듭니다.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl MemoryQueue {
    /// 빈 큐를 생성합니다.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(StreamState::default()),
                appended: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StreamState>, QueueError> {
        self.inner
            .state
            .lock()
            .map_err(|_| QueueError::Backend(format!("queue '{}' lock poisoned", self.inner.name)))
    }

    fn take_new(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| QueueError::GroupNotFound {
                group: group.to_owned(),
            })?;

        let now = Instant::now();
        let mut taken = Vec::new();
        for (id, fields) in state
            .entries
            .range(group_state.last_delivered.next()..)
            .take(limit)
        {
            group_state.pending.insert(
                *id,
                PendingEntry {
                    consumer: consumer.to_owned(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            taken.push(QueueEntry {
                id: *id,
                fields: fields.clone(),
            });
        }
        if let Some(last) = taken.last() {
            group_state.last_delivered = last.id;
        }
        Ok(taken)
    }

    /// 엔트리의 누적 전달 횟수 (pending이 아니면 `None`)
    pub fn delivery_count(&self, group: &str, id: EntryId) -> Option<u64> {
        let state = self.lock().ok()?;
        state
            .groups
            .get(group)?
            .pending
            .get(&id)
            .map(|p| p.delivery_count)
    }
}

impl DurableQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn enqueue(&self, fields: Fields) -> Result<EntryId, QueueError> {
        let id = {
            let mut state = self.lock()?;
            let id = state.next_id();
            state.entries.insert(id, fields);
            id
        };
        self.inner.appended.notify_waiters();
        Ok(id)
    }

    async fn enqueue_batch(&self, batch: Vec<Fields>) -> Result<Vec<EntryId>, QueueError> {
        let ids = {
            let mut state = self.lock()?;
            let mut ids = Vec::with_capacity(batch.len());
            for fields in batch {
                let id = state.next_id();
                state.entries.insert(id, fields);
                ids.push(id);
            }
            ids
        };
        if !ids.is_empty() {
            self.inner.appended.notify_waiters();
        }
        Ok(ids)
    }

    async fn ensure_group(&self, group: &str, start: StartPosition) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.groups.contains_key(group) {
            return Ok(());
        }
        let last_delivered = match start {
            StartPosition::New => state.last_id,
            StartPosition::Beginning => EntryId::MIN,
        };
        state.groups.insert(
            group.to_owned(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        tracing::debug!(stream = %self.inner.name, group, ?start, "consumer group created");
        Ok(())
    }

    async fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let ids: Vec<EntryId> = {
            let group_state = state.group_mut(group)?;
            let mut ids = Vec::new();
            for (id, pending) in group_state
                .pending
                .iter_mut()
                .filter(|(_, p)| p.consumer == consumer)
                .take(limit)
            {
                pending.delivered_at = now;
                pending.delivery_count += 1;
                ids.push(*id);
            }
            ids
        };
        Ok(ids.into_iter().map(|id| state.entry(id)).collect())
    }

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
        block: Duration,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.inner.appended.notified();
            tokio::pin!(notified);
            // 검사 전에 대기자로 등록해야 그 사이의 추가를 놓치지 않음
            notified.as_mut().enable();

            let taken = self.take_new(group, consumer, limit)?;
            if !taken.is_empty() || block.is_zero() {
                return Ok(taken);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let ids: Vec<EntryId> = {
            let group_state = state.group_mut(group)?;
            let mut ids = Vec::new();
            for (id, pending) in group_state
                .pending
                .iter_mut()
                .filter(|(_, p)| {
                    p.consumer != consumer && now.saturating_duration_since(p.delivered_at) >= min_idle
                })
                .take(limit)
            {
                tracing::debug!(
                    entry_id = %id,
                    from = %pending.consumer,
                    to = consumer,
                    "claiming idle pending entry"
                );
                pending.consumer = consumer.to_owned();
                pending.delivered_at = now;
                pending.delivery_count += 1;
                ids.push(*id);
            }
            ids
        };
        Ok(ids.into_iter().map(|id| state.entry(id)).collect())
    }

    async fn ack(&self, group: &str, ids: &[EntryId]) -> Result<usize, QueueError> {
        let mut state = self.lock()?;
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| group_state.pending.remove(id).is_some())
            .count())
    }

    async fn range(
        &self,
        after: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let state = self.lock()?;
        let start = after.map_or(EntryId::MIN, EntryId::next);
        Ok(state
            .entries
            .range(start..)
            .take(limit)
            .map(|(id, fields)| QueueEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.entries.len())
    }

    async fn pending_count(&self, group: &str) -> Result<usize, QueueError> {
        let state = self.lock()?;
        state
            .groups
            .get(group)
            .map(|g| g.pending.len())
            .ok_or_else(|| QueueError::GroupNotFound {
                group: group.to_owned(),
            })
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.lock().map(|_| ())
    }
}
