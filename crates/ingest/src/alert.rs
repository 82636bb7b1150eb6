//! 임계값 알림 평가기
//!
//! 일정 주기마다 규칙별로 최근 구간의 일치 레코드 수를 세고,
//! 임계값 이상이며 중복 방지 마커가 없으면 알림을 발송합니다.
//!
//! ```text
//! IDLE ──count >= threshold──> 마커 설정 성공 ──> 발송 ──> SUPPRESSED
//!   ^                                                          │
//!   └──────────────────── 마커 만료 (window_secs) ─────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logsluice_core::config::AlertRuleConfig;
use logsluice_core::error::{LogsluiceError, PipelineError};
use logsluice_core::metrics as m;
use logsluice_core::pipeline::{HealthStatus, Pipeline};
use logsluice_core::types::{LogFilter, LogLevel};

use crate::config::EvaluatorConfig;
use crate::error::IngestError;
use crate::marker::MarkerStore;
use crate::store::LogStore;

/// 기본 알림 채널 용량
const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// 임계값 알림 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    /// 규칙 키 (마커 키에도 사용)
    pub key: String,
    /// 레벨 조건
    pub level: Option<LogLevel>,
    /// 서비스 조건
    pub service: Option<String>,
    /// 발송 임계값
    pub threshold: u64,
    /// 집계 구간 (초)
    pub window_secs: u64,
}

impl AlertRule {
    /// 설정에서 규칙을 만듭니다.
    ///
    /// `level`과 `service`가 모두 비어 있으면 키가 레벨명일 때 레벨 조건,
    /// 아니면 서비스 조건으로 해석합니다.
    pub fn from_config(config: &AlertRuleConfig) -> Self {
        let (level, service) = match (&config.level, &config.service) {
            (None, None) => match LogLevel::from_known(&config.key) {
                Some(level) => (Some(level), None),
                None => (None, Some(config.key.clone())),
            },
            (level, service) => (level.as_deref().map(LogLevel::parse), service.clone()),
        };
        Self {
            key: config.key.clone(),
            level,
            service,
            threshold: config.threshold,
            window_secs: config.window_secs,
        }
    }

    /// 집계 구간 (마커 TTL)
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// `now`에서 끝나는 구간의 조회 필터
    pub fn filter(&self, now: DateTime<Utc>) -> LogFilter {
        let since = i64::try_from(self.window_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .and_then(|window| now.checked_sub_signed(window));
        LogFilter {
            level: self.level.clone(),
            service: self.service.clone(),
            since,
            ..Default::default()
        }
    }
}

/// 발송된 알림
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertNotification {
    /// 규칙 키
    pub rule_key: String,
    /// 구간 내 일치 건수
    pub count: u64,
    /// 임계값
    pub threshold: u64,
    /// 집계 구간 (초)
    pub window_secs: u64,
    /// 발송 시각
    pub fired_at: DateTime<Utc>,
    /// 사람이 읽는 메시지
    pub message: String,
}

impl AlertNotification {
    fn new(rule: &AlertRule, count: u64, fired_at: DateTime<Utc>) -> Self {
        Self {
            rule_key: rule.key.clone(),
            count,
            threshold: rule.threshold,
            window_secs: rule.window_secs,
            fired_at,
            message: format!(
                "ALERT: {count} logs for '{}' in last {}s (Threshold: {})",
                rule.key, rule.window_secs, rule.threshold
            ),
        }
    }
}

/// 평가기 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvaluatorState {
    Initialized,
    Running,
    Stopped,
}

#[derive(Default)]
struct Counters {
    evaluations: AtomicU64,
    fired: AtomicU64,
    suppressed: AtomicU64,
}

struct EvaluatorCore<S, M> {
    config: EvaluatorConfig,
    store: S,
    markers: M,
    notification_tx: mpsc::Sender<AlertNotification>,
    counters: Counters,
}

impl<S: LogStore, M: MarkerStore> EvaluatorCore<S, M> {
    async fn evaluate(&self, now: DateTime<Utc>) -> Vec<AlertNotification> {
        self.counters.evaluations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::ALERT_EVALUATIONS_TOTAL).increment(1);

        let mut fired = Vec::new();
        for rule in &self.config.rules {
            match self.evaluate_rule(rule, now).await {
                Ok(Some(notification)) => fired.push(notification),
                Ok(None) => {}
                Err(e) => warn!(rule = %rule.key, error = %e, "alert rule evaluation failed"),
            }
        }
        fired
    }

    async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertNotification>, IngestError> {
        let count = self.store.count_logs(&rule.filter(now)).await?;
        if count < rule.threshold {
            return Ok(None);
        }
        if !self.markers.try_acquire(&rule.key, rule.window()).await? {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::ALERT_SUPPRESSED_TOTAL).increment(1);
            debug!(rule = %rule.key, count, "alert suppressed by active marker");
            return Ok(None);
        }

        let notification = AlertNotification::new(rule, count, now);
        self.counters.fired.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::ALERT_FIRED_TOTAL).increment(1);
        info!(rule = %rule.key, count, threshold = rule.threshold, "alert fired");
        if self.notification_tx.send(notification.clone()).await.is_err() {
            warn!(rule = %rule.key, "notification receiver dropped");
        }
        Ok(Some(notification))
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.evaluate(Utc::now()).await;
                }
            }
        }
        debug!("alert evaluator loop exited");
    }
}

/// 알림 평가기
pub struct AlertEvaluator<S, M> {
    state: EvaluatorState,
    core: Arc<EvaluatorCore<S, M>>,
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl<S, M> AlertEvaluator<S, M>
where
    S: LogStore + 'static,
    M: MarkerStore + 'static,
{
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            EvaluatorState::Initialized => "initialized",
            EvaluatorState::Running => "running",
            EvaluatorState::Stopped => "stopped",
        }
    }

    /// 평가 규칙
    pub fn rules(&self) -> &[AlertRule] {
        &self.core.config.rules
    }

    /// 모든 규칙을 `now` 기준으로 한 번 평가하고 발송된 알림을 반환합니다.
    pub async fn evaluate_once(&self, now: DateTime<Utc>) -> Vec<AlertNotification> {
        self.core.evaluate(now).await
    }

    /// 평가 횟수
    pub fn evaluations(&self) -> u64 {
        self.core.counters.evaluations.load(Ordering::Relaxed)
    }

    /// 발송한 알림 수
    pub fn fired_count(&self) -> u64 {
        self.core.counters.fired.load(Ordering::Relaxed)
    }

    /// 마커로 억제된 알림 수
    pub fn suppressed_count(&self) -> u64 {
        self.core.counters.suppressed.load(Ordering::Relaxed)
    }
}

impl<S, M> Pipeline for AlertEvaluator<S, M>
where
    S: LogStore + 'static,
    M: MarkerStore + 'static,
{
    async fn start(&mut self) -> Result<(), LogsluiceError> {
        if self.state == EvaluatorState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            rules = self.core.config.rules.len(),
            interval_secs = self.core.config.interval.as_secs(),
            "starting alert evaluator"
        );
        self.cancel = CancellationToken::new();
        let core = Arc::clone(&self.core);
        self.task = Some(tokio::spawn(core.run(self.cancel.clone())));
        self.state = EvaluatorState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogsluiceError> {
        if self.state != EvaluatorState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "alert evaluator task ended abnormally");
            }
        }
        self.state = EvaluatorState::Stopped;
        info!(
            evaluations = self.evaluations(),
            fired = self.fired_count(),
            "alert evaluator stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            EvaluatorState::Running => {
                if let Err(e) = self.core.store.ping().await {
                    return HealthStatus::Unhealthy(format!("store unreachable: {e}"));
                }
                if self.core.markers.is_degraded() {
                    HealthStatus::Degraded("dedup markers are process-local".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            EvaluatorState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            EvaluatorState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 알림 평가기 빌더
pub struct AlertEvaluatorBuilder<S, M> {
    config: EvaluatorConfig,
    store: Option<S>,
    markers: Option<M>,
    notification_tx: Option<mpsc::Sender<AlertNotification>>,
    channel_capacity: usize,
}

impl<S, M> AlertEvaluatorBuilder<S, M>
where
    S: LogStore + 'static,
    M: MarkerStore + 'static,
{
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: EvaluatorConfig::default(),
            store: None,
            markers: None,
            notification_tx: None,
            channel_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }

    /// 평가기 설정을 지정합니다.
    pub fn config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    /// 조회할 저장소를 설정합니다.
    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    /// 마커 저장소를 설정합니다.
    pub fn markers(mut self, markers: M) -> Self {
        self.markers = Some(markers);
        self
    }

    /// 외부 알림 채널을 설정합니다.
    pub fn notification_sender(mut self, tx: mpsc::Sender<AlertNotification>) -> Self {
        self.notification_tx = Some(tx);
        self
    }

    /// 내부 알림 채널 용량을 설정합니다.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// 평가기를 빌드합니다.
    ///
    /// # Returns
    /// - `AlertEvaluator`: 평가기 인스턴스
    /// - `Option<mpsc::Receiver<AlertNotification>>`: 알림 수신 채널
    ///   (외부 sender를 설정한 경우 None)
    pub fn build(
        self,
    ) -> Result<(AlertEvaluator<S, M>, Option<mpsc::Receiver<AlertNotification>>), IngestError>
    {
        if self.config.interval.is_zero() {
            return Err(IngestError::Config {
                field: "interval".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if let Some(rule) = self
            .config
            .rules
            .iter()
            .find(|r| r.threshold == 0 || r.window_secs == 0)
        {
            return Err(IngestError::Config {
                field: "rules".to_owned(),
                reason: format!("rule '{}': threshold and window must be positive", rule.key),
            });
        }
        let store = self.store.ok_or_else(|| IngestError::Config {
            field: "store".to_owned(),
            reason: "must be provided".to_owned(),
        })?;
        let markers = self.markers.ok_or_else(|| IngestError::Config {
            field: "markers".to_owned(),
            reason: "must be provided".to_owned(),
        })?;

        let (notification_tx, notification_rx) = match self.notification_tx {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));
                (tx, Some(rx))
            }
        };

        let core = EvaluatorCore {
            config: self.config,
            store,
            markers,
            notification_tx,
            counters: Counters::default(),
        };
        let evaluator = AlertEvaluator {
            state: EvaluatorState::Initialized,
            core: Arc::new(core),
            cancel: CancellationToken::new(),
            task: None,
        };
        Ok((evaluator, notification_rx))
    }
}

impl<S, M> Default for AlertEvaluatorBuilder<S, M>
where
    S: LogStore + 'static,
    M: MarkerStore + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
