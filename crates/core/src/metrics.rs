//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logsluice_`
//! - 컴포넌트명: `gateway_`, `worker_`, `resolver_`, `alert_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logsluice_core::metrics::WORKER_PERSISTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 게이트웨이 경로 레이블 키 (queued, direct)
pub const LABEL_PATH: &str = "path";

/// 데드레터 사유 레이블 키 (decode, validation, persistence)
pub const LABEL_REASON: &str = "reason";

/// 워커 단계 레이블 키 (pending, claimed, new)
pub const LABEL_PHASE: &str = "phase";

// ─── Gateway 메트릭 ────────────────────────────────────────────────

/// Gateway: 수락된 레코드 수 (counter, label: path)
pub const GATEWAY_RECORDS_ACCEPTED_TOTAL: &str = "logsluice_gateway_records_accepted_total";

/// Gateway: 거부된 배치 수 (counter)
pub const GATEWAY_BATCHES_REJECTED_TOTAL: &str = "logsluice_gateway_batches_rejected_total";

/// Gateway: 큐 장애로 직접 저장 경로를 사용한 횟수 (counter)
pub const GATEWAY_FALLBACKS_TOTAL: &str = "logsluice_gateway_fallbacks_total";

// ─── Worker 메트릭 ─────────────────────────────────────────────────

/// Worker: 큐에서 읽은 엔트리 수 (counter, label: phase)
pub const WORKER_ENTRIES_READ_TOTAL: &str = "logsluice_worker_entries_read_total";

/// Worker: 저장된 레코드 수 (counter)
pub const WORKER_PERSISTED_TOTAL: &str = "logsluice_worker_persisted_total";

/// Worker: 데드레터로 보낸 엔트리 수 (counter, label: reason)
pub const WORKER_DEAD_LETTERED_TOTAL: &str = "logsluice_worker_dead_lettered_total";

/// Worker: ack된 엔트리 수 (counter)
pub const WORKER_ACKED_TOTAL: &str = "logsluice_worker_acked_total";

/// Worker: 큐 읽기 에러 수 (counter)
pub const WORKER_QUEUE_ERRORS_TOTAL: &str = "logsluice_worker_queue_errors_total";

/// Worker: 배치 처리 시간 (histogram, 초)
pub const WORKER_BATCH_DURATION_SECONDS: &str = "logsluice_worker_batch_duration_seconds";

/// Worker: 컨슈머 그룹 pending 엔트리 수 (gauge)
pub const WORKER_PENDING_ENTRIES: &str = "logsluice_worker_pending_entries";

// ─── Resolver 메트릭 ───────────────────────────────────────────────

/// Resolver: 새로 생성된 앱 등록 수 (counter)
pub const RESOLVER_APPS_CREATED_TOTAL: &str = "logsluice_resolver_apps_created_total";

/// Resolver: 이름 충돌로 재시도한 횟수 (counter)
pub const RESOLVER_CONFLICT_RETRIES_TOTAL: &str = "logsluice_resolver_conflict_retries_total";

// ─── Alert 메트릭 ──────────────────────────────────────────────────

/// Alert: 평가 주기 실행 수 (counter)
pub const ALERT_EVALUATIONS_TOTAL: &str = "logsluice_alert_evaluations_total";

/// Alert: 발송된 알림 수 (counter)
pub const ALERT_FIRED_TOTAL: &str = "logsluice_alert_fired_total";

/// Alert: 마커로 억제된 알림 수 (counter)
pub const ALERT_SUPPRESSED_TOTAL: &str = "logsluice_alert_suppressed_total";

/// Alert: 공유 마커 저장소 저하 상태 (gauge, 0 또는 1)
pub const ALERT_MARKER_DEGRADED: &str = "logsluice_alert_marker_degraded";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logsluice_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logsluice_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 배치 처리 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 30s 범위, 트랜잭션 커밋 포함
pub const BATCH_DURATION_BUCKETS: [f64; 10] =
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `logsluice-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Gateway
    describe_counter!(
        GATEWAY_RECORDS_ACCEPTED_TOTAL,
        "Total number of records accepted by the gateway, by path"
    );
    describe_counter!(
        GATEWAY_BATCHES_REJECTED_TOTAL,
        "Total number of batches rejected as malformed"
    );
    describe_counter!(
        GATEWAY_FALLBACKS_TOTAL,
        "Total number of batches persisted directly because the queue was unavailable"
    );

    // Worker
    describe_counter!(
        WORKER_ENTRIES_READ_TOTAL,
        "Total number of queue entries read by workers, by phase"
    );
    describe_counter!(
        WORKER_PERSISTED_TOTAL,
        "Total number of records persisted by workers"
    );
    describe_counter!(
        WORKER_DEAD_LETTERED_TOTAL,
        "Total number of queue entries sent to the dead-letter stream, by reason"
    );
    describe_counter!(WORKER_ACKED_TOTAL, "Total number of queue entries acknowledged");
    describe_counter!(
        WORKER_QUEUE_ERRORS_TOTAL,
        "Total number of queue read errors seen by workers"
    );
    describe_histogram!(
        WORKER_BATCH_DURATION_SECONDS,
        "Time to process a single queue batch in seconds"
    );
    describe_gauge!(
        WORKER_PENDING_ENTRIES,
        "Entries delivered to the consumer group but not yet acknowledged"
    );

    // Resolver
    describe_counter!(
        RESOLVER_APPS_CREATED_TOTAL,
        "Total number of application registrations created implicitly"
    );
    describe_counter!(
        RESOLVER_CONFLICT_RETRIES_TOTAL,
        "Total number of app creation retries after a name conflict"
    );

    // Alert
    describe_counter!(
        ALERT_EVALUATIONS_TOTAL,
        "Total number of alert evaluation rounds"
    );
    describe_counter!(ALERT_FIRED_TOTAL, "Total number of alert notifications fired");
    describe_counter!(
        ALERT_SUPPRESSED_TOTAL,
        "Total number of alerts suppressed by an active dedup marker"
    );
    describe_gauge!(
        ALERT_MARKER_DEGRADED,
        "1 when dedup markers fall back to the in-process map"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "logsluice daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
