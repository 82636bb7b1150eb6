//! 배치 워커 -- 큐를 소비하여 저장소에 영속화
//!
//! [`BatchWorker`]는 core의 [`Pipeline`] trait을 구현하여
//! `logsluice-daemon`에서 다른 모듈과 동일한 생명주기로 관리됩니다.
//!
//! # 처리 흐름
//! ```text
//! 시작: ensure_group ─> pending 전부 재처리 (크래시 복구)
//!
//! 루프: read_pending ─> process ─> ack
//!       claim_idle   ─> process ─> ack   (claim_idle_ms > 0)
//!       read_new     ─> process ─> ack   (없으면 idle_sleep)
//!
//! process: decode ──실패──> 해당 엔트리만 데드레터
//!            │
//!          validate ──실패──> 배치 전체 데드레터
//!            │
//!          resolver.persist ──실패──> 배치 전체 데드레터
//! ```
//!
//! 저장되었거나 데드레터에 기록된 엔트리만 ack합니다.
//! 어느 쪽에도 도달하지 못한 엔트리는 pending에 남아 다음 pending 읽기에서 다시 처리됩니다.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logsluice_core::error::{LogsluiceError, PipelineError};
use logsluice_core::metrics as m;
use logsluice_core::pipeline::{HealthStatus, Pipeline};
use logsluice_core::types::EntryId;

use crate::config::IngestConfig;
use crate::dead_letter::{DeadLetterEntry, DeadLetterSink};
use crate::error::IngestError;
use crate::queue::{DurableQueue, QueueEntry, QueueEnvelope};
use crate::resolver::BulkResolver;
use crate::schema;
use crate::store::LogStore;

/// 워커 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 배치 하나의 처리 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// 저장된 레코드 수
    pub persisted: usize,
    /// 데드레터에 기록된 엔트리 수
    pub dead_lettered: usize,
    /// ack된 엔트리 수
    pub acked: usize,
    /// 종결되지 못해 pending에 남은 엔트리 수
    pub unresolved: usize,
}

/// 워커 누적 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// 읽은 엔트리 수
    pub entries_read: u64,
    /// 처리한 배치 수
    pub batches: u64,
    /// 저장된 레코드 수
    pub persisted: u64,
    /// 데드레터 엔트리 수
    pub dead_lettered: u64,
    /// ack된 엔트리 수
    pub acked: u64,
    /// 큐 에러 횟수
    pub queue_errors: u64,
}

#[derive(Default)]
struct Counters {
    entries_read: AtomicU64,
    batches: AtomicU64,
    persisted: AtomicU64,
    dead_lettered: AtomicU64,
    acked: AtomicU64,
    queue_errors: AtomicU64,
    last_queue_error: Mutex<Option<String>>,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            entries_read: self.entries_read.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
        }
    }

    fn set_last_error(&self, error: Option<String>) {
        if let Ok(mut slot) = self.last_queue_error.lock() {
            *slot = error;
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_queue_error.lock().ok().and_then(|slot| slot.clone())
    }
}

/// 루프 한 번의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Poll {
    /// 새 엔트리가 없었음
    Idle,
    /// 새 엔트리를 처리함
    Busy,
}

/// 엔트리 읽기 단계 (메트릭 레이블)
#[derive(Debug, Clone, Copy)]
enum Phase {
    Pending,
    Claimed,
    New,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::New => "new",
        }
    }
}

/// 워커와 백그라운드 태스크가 공유하는 처리 로직
struct WorkerCore<Q, S> {
    config: IngestConfig,
    queue: Q,
    dead_letters: DeadLetterSink<Q>,
    resolver: BulkResolver<S>,
    counters: Counters,
    outcome_tx: Option<mpsc::Sender<BatchOutcome>>,
}

impl<Q: DurableQueue, S: LogStore> WorkerCore<Q, S> {
    /// 엔트리 배치를 처리하고 종결된 엔트리를 ack합니다.
    async fn process_batch(&self, entries: Vec<QueueEntry>) -> BatchOutcome {
        let started = Instant::now();
        let mut outcome = BatchOutcome::default();
        let mut terminal: Vec<EntryId> = Vec::with_capacity(entries.len());
        let mut decoded: Vec<(QueueEntry, Value)> = Vec::with_capacity(entries.len());

        for entry in entries {
            match QueueEnvelope::unwrap(&entry) {
                Ok(value) => decoded.push((entry, value)),
                Err(e) => {
                    let dead = DeadLetterEntry::new(
                        e.to_string(),
                        entry.id,
                        QueueEnvelope::raw(&entry).map(str::to_owned),
                    );
                    match self.dead_letters.record(&dead).await {
                        Ok(_) => {
                            metrics::counter!(m::WORKER_DEAD_LETTERED_TOTAL, m::LABEL_REASON => "decode")
                                .increment(1);
                            outcome.dead_lettered += 1;
                            terminal.push(entry.id);
                        }
                        Err(dlq_err) => {
                            warn!(entry_id = %entry.id, error = %dlq_err, "dead-letter write failed, leaving entry pending");
                            outcome.unresolved += 1;
                        }
                    }
                }
            }
        }

        if !decoded.is_empty() {
            let values: Vec<Value> = decoded.iter().map(|(_, value)| value.clone()).collect();
            let failure = match schema::validate_batch(&values, Utc::now()) {
                Ok(records) => match self.resolver.persist(records).await {
                    Ok(persisted) => {
                        outcome.persisted = persisted.len();
                        terminal.extend(decoded.iter().map(|(entry, _)| entry.id));
                        metrics::counter!(m::WORKER_PERSISTED_TOTAL).increment(persisted.len() as u64);
                        None
                    }
                    Err(e) => Some((e, "persistence")),
                },
                Err(e) => Some((e, "validation")),
            };
            if let Some((error, reason)) = failure {
                warn!(
                    count = decoded.len(),
                    reason,
                    error = %error,
                    "batch failed, dead-lettering every entry"
                );
                let error_text = error.to_string();
                let dead: Vec<DeadLetterEntry> = decoded
                    .iter()
                    .map(|(entry, _)| {
                        DeadLetterEntry::new(
                            error_text.clone(),
                            entry.id,
                            QueueEnvelope::raw(entry).map(str::to_owned),
                        )
                    })
                    .collect();
                match self.dead_letters.record_all(&dead).await {
                    Ok(_) => {
                        metrics::counter!(m::WORKER_DEAD_LETTERED_TOTAL, m::LABEL_REASON => reason)
                            .increment(dead.len() as u64);
                        outcome.dead_lettered += dead.len();
                        terminal.extend(dead.iter().map(|d| d.msg_id));
                    }
                    Err(dlq_err) => {
                        warn!(error = %dlq_err, count = dead.len(), "dead-letter write failed, leaving batch pending");
                        outcome.unresolved += dead.len();
                    }
                }
            }
        }

        if !terminal.is_empty() {
            match self.queue.ack(&self.config.group, &terminal).await {
                Ok(acked) => {
                    outcome.acked = acked;
                    metrics::counter!(m::WORKER_ACKED_TOTAL).increment(acked as u64);
                }
                Err(e) => {
                    warn!(error = %e, count = terminal.len(), "ack failed, entries stay pending");
                    outcome.unresolved += terminal.len();
                }
            }
        }

        let c = &self.counters;
        c.batches.fetch_add(1, Ordering::Relaxed);
        c.persisted.fetch_add(outcome.persisted as u64, Ordering::Relaxed);
        c.dead_lettered.fetch_add(outcome.dead_lettered as u64, Ordering::Relaxed);
        c.acked.fetch_add(outcome.acked as u64, Ordering::Relaxed);
        metrics::histogram!(m::WORKER_BATCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if let Ok(pending) = self.queue.pending_count(&self.config.group).await {
            metrics::gauge!(m::WORKER_PENDING_ENTRIES).set(pending as f64);
        }

        debug!(
            persisted = outcome.persisted,
            dead_lettered = outcome.dead_lettered,
            acked = outcome.acked,
            unresolved = outcome.unresolved,
            "batch processed"
        );
        if let Some(tx) = &self.outcome_tx {
            if tx.try_send(outcome).is_err() {
                debug!("outcome channel full or closed, dropping batch outcome");
            }
        }
        outcome
    }

    fn record_read(&self, phase: Phase, count: usize) {
        if count == 0 {
            return;
        }
        self.counters
            .entries_read
            .fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!(m::WORKER_ENTRIES_READ_TOTAL, m::LABEL_PHASE => phase.as_str())
            .increment(count as u64);
    }

    /// 이 컨슈머의 pending 엔트리를 비워질 때까지(또는 진전이 없을 때까지) 처리합니다.
    async fn drain_pending(&self, cancel: &CancellationToken) -> Result<usize, IngestError> {
        let mut recovered = 0;
        while !cancel.is_cancelled() {
            let entries = self
                .queue
                .read_pending(&self.config.group, &self.config.consumer, self.config.batch_size)
                .await?;
            if entries.is_empty() {
                break;
            }
            self.record_read(Phase::Pending, entries.len());
            let outcome = self.process_batch(entries).await;
            recovered += outcome.acked;
            if outcome.acked == 0 {
                warn!(unresolved = outcome.unresolved, "pending recovery made no progress");
                break;
            }
        }
        Ok(recovered)
    }

    /// 루프 한 번: pending, 유휴 회수, 새 엔트리 순으로 처리합니다.
    async fn poll_once(&self, cancel: &CancellationToken) -> Result<Poll, IngestError> {
        let cfg = &self.config;

        let pending = self
            .queue
            .read_pending(&cfg.group, &cfg.consumer, cfg.batch_size)
            .await?;
        if !pending.is_empty() {
            self.record_read(Phase::Pending, pending.len());
            self.process_batch(pending).await;
        }

        if let Some(min_idle) = cfg.claim_idle() {
            let claimed = self
                .queue
                .claim_idle(&cfg.group, &cfg.consumer, min_idle, cfg.batch_size)
                .await?;
            if !claimed.is_empty() {
                info!(count = claimed.len(), "claimed idle entries from other consumers");
                self.record_read(Phase::Claimed, claimed.len());
                self.process_batch(claimed).await;
            }
        }

        let fresh = tokio::select! {
            _ = cancel.cancelled() => return Ok(Poll::Idle),
            read = self.queue.read_new(&cfg.group, &cfg.consumer, cfg.batch_size, cfg.block()) => read?,
        };
        if fresh.is_empty() {
            return Ok(Poll::Idle);
        }
        self.record_read(Phase::New, fresh.len());
        self.process_batch(fresh).await;
        Ok(Poll::Busy)
    }

    /// 취소될 때까지 처리 루프를 실행합니다.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        match self.drain_pending(&cancel).await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "recovered pending entries"),
            Err(e) => self.on_queue_error(&e),
        }

        while !cancel.is_cancelled() {
            let pause = match self.poll_once(&cancel).await {
                Ok(Poll::Busy) => {
                    self.counters.set_last_error(None);
                    continue;
                }
                Ok(Poll::Idle) => {
                    self.counters.set_last_error(None);
                    self.config.idle_sleep()
                }
                Err(e) => {
                    self.on_queue_error(&e);
                    self.config.error_backoff()
                }
            };
            sleep_or_cancel(pause, &cancel).await;
        }
        debug!(consumer = %self.config.consumer, "worker loop exited");
    }

    fn on_queue_error(&self, error: &IngestError) {
        self.counters.queue_errors.fetch_add(1, Ordering::Relaxed);
        self.counters.set_last_error(Some(error.to_string()));
        metrics::counter!(m::WORKER_QUEUE_ERRORS_TOTAL).increment(1);
        warn!(error = %error, "queue read failed, backing off");
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return;
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

/// 배치 워커
///
/// # 사용 예시
/// ```ignore
/// use logsluice_ingest::{BatchWorkerBuilder, DeadLetterSink, MemoryQueue, MemoryStore};
///
/// let (mut worker, _outcomes) = BatchWorkerBuilder::new()
///     .config(config)
///     .queue(queue)
///     .dead_letters(DeadLetterSink::new(dlq))
///     .store(store)
///     .build()?;
/// worker.start().await?;
/// ```
pub struct BatchWorker<Q, S> {
    state: WorkerState,
    core: Arc<WorkerCore<Q, S>>,
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl<Q, S> BatchWorker<Q, S>
where
    Q: DurableQueue + 'static,
    S: LogStore + 'static,
{
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            WorkerState::Initialized => "initialized",
            WorkerState::Running => "running",
            WorkerState::Stopped => "stopped",
        }
    }

    /// 이 워커의 컨슈머 이름
    pub fn consumer(&self) -> &str {
        &self.core.config.consumer
    }

    /// 누적 통계 스냅샷
    pub fn stats(&self) -> WorkerStats {
        self.core.counters.snapshot()
    }

    /// 엔트리 배치 하나를 직접 처리합니다.
    pub async fn process_batch(&self, entries: Vec<QueueEntry>) -> BatchOutcome {
        self.core.process_batch(entries).await
    }

    /// pending 엔트리를 모두 재처리하고 ack된 수를 반환합니다.
    pub async fn recover_pending(&self) -> Result<usize, IngestError> {
        self.core.drain_pending(&CancellationToken::new()).await
    }
}

impl<Q, S> Pipeline for BatchWorker<Q, S>
where
    Q: DurableQueue + 'static,
    S: LogStore + 'static,
{
    async fn start(&mut self) -> Result<(), LogsluiceError> {
        if self.state == WorkerState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let cfg = &self.core.config;
        info!(
            stream = %self.core.queue.name(),
            group = %cfg.group,
            consumer = %cfg.consumer,
            batch_size = cfg.batch_size,
            "starting batch worker"
        );

        self.core
            .queue
            .ensure_group(&cfg.group, cfg.start_position)
            .await
            .map_err(IngestError::from)?;

        self.cancel = CancellationToken::new();
        let core = Arc::clone(&self.core);
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(core.run(cancel)));

        self.state = WorkerState::Running;
        info!("batch worker started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogsluiceError> {
        if self.state != WorkerState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping batch worker");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }

        self.state = WorkerState::Stopped;
        info!(stats = ?self.stats(), "batch worker stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            WorkerState::Running => {
                if let Err(e) = self.core.queue.ping().await {
                    return HealthStatus::Unhealthy(format!("queue unreachable: {e}"));
                }
                if let Err(e) = self.core.resolver.store().ping().await {
                    return HealthStatus::Unhealthy(format!("store unreachable: {e}"));
                }
                match self.core.counters.last_error() {
                    Some(error) => HealthStatus::Degraded(format!("last queue read failed: {error}")),
                    None => HealthStatus::Healthy,
                }
            }
            WorkerState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            WorkerState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 배치 워커 빌더
pub struct BatchWorkerBuilder<Q, S> {
    config: IngestConfig,
    queue: Option<Q>,
    dead_letters: Option<DeadLetterSink<Q>>,
    store: Option<S>,
    outcome_capacity: Option<usize>,
}

impl<Q, S> BatchWorkerBuilder<Q, S>
where
    Q: DurableQueue + 'static,
    S: LogStore + 'static,
{
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
            queue: None,
            dead_letters: None,
            store: None,
            outcome_capacity: None,
        }
    }

    /// 워커 설정을 지정합니다.
    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// 소비할 큐를 설정합니다.
    pub fn queue(mut self, queue: Q) -> Self {
        self.queue = Some(queue);
        self
    }

    /// 데드레터 싱크를 설정합니다.
    pub fn dead_letters(mut self, sink: DeadLetterSink<Q>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// 저장소를 설정합니다.
    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    /// 배치 결과 채널을 만듭니다.
    pub fn outcome_channel(mut self, capacity: usize) -> Self {
        self.outcome_capacity = Some(capacity);
        self
    }

    /// 워커를 빌드합니다.
    ///
    /// # Returns
    /// - `BatchWorker`: 워커 인스턴스
    /// - `Option<mpsc::Receiver<BatchOutcome>>`: 배치 결과 수신 채널
    ///   (`outcome_channel`을 호출하지 않은 경우 None)
    pub fn build(
        self,
    ) -> Result<(BatchWorker<Q, S>, Option<mpsc::Receiver<BatchOutcome>>), IngestError> {
        self.config.validate()?;

        let missing = |field: &str| IngestError::Config {
            field: field.to_owned(),
            reason: "must be provided".to_owned(),
        };
        let queue = self.queue.ok_or_else(|| missing("queue"))?;
        let dead_letters = self.dead_letters.ok_or_else(|| missing("dead_letters"))?;
        let store = self.store.ok_or_else(|| missing("store"))?;
        if dead_letters.name() == queue.name() {
            return Err(IngestError::Config {
                field: "dead_letters".to_owned(),
                reason: "dead-letter stream must differ from the consumed stream".to_owned(),
            });
        }

        let (outcome_tx, outcome_rx) = match self.outcome_capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        let core = WorkerCore {
            config: self.config,
            queue,
            dead_letters,
            resolver: BulkResolver::new(store),
            counters: Counters::default(),
            outcome_tx,
        };

        let worker = BatchWorker {
            state: WorkerState::Initialized,
            core: Arc::new(core),
            cancel: CancellationToken::new(),
            task: None,
        };
        Ok((worker, outcome_rx))
    }
}

impl<Q, S> Default for BatchWorkerBuilder<Q, S>
where
    Q: DurableQueue + 'static,
    S: LogStore + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
