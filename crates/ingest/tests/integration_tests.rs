//! 통합 테스트 -- 게이트웨이부터 저장소, 데드레터, 알림까지 전체 흐름 검증

use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};

use logsluice_core::config::AlertRuleConfig;
use logsluice_core::pipeline::Pipeline;
use logsluice_core::types::LogFilter;
use logsluice_ingest::{
    AlertEvaluatorBuilder, AlertRule, BatchWorker, BatchWorkerBuilder, BulkResolver,
    DeadLetterSink, DurableQueue, EvaluatorConfig, Fields, IngestConfig, IngestConfigBuilder,
    IngestGateway, IngestPath, LogStore, MemoryMarkerStore, MemoryQueue, MemoryStore,
    QueueEnvelope, RedisStreamQueue, SqliteStore, StartPosition,
};

const GROUP: &str = "ingest-group";

fn record(message: &str, app: &str) -> Value {
    json!({"level": "ERROR", "message": message, "service": "api", "app": app})
}

fn config(consumer: &str) -> IngestConfig {
    IngestConfigBuilder::new()
        .stream("logs:stream")
        .dead_letter_stream("logs:dlq")
        .group(GROUP)
        .consumer(consumer)
        .batch_size(50)
        .block_ms(0)
        .idle_sleep_ms(5)
        .error_backoff_ms(5)
        .build()
        .expect("valid config")
}

fn worker<S: LogStore + Clone + 'static>(
    queue: &MemoryQueue,
    dlq: &MemoryQueue,
    store: &S,
    consumer: &str,
) -> BatchWorker<MemoryQueue, S> {
    let (worker, _) = BatchWorkerBuilder::new()
        .config(config(consumer))
        .queue(queue.clone())
        .dead_letters(DeadLetterSink::new(dlq.clone()))
        .store(store.clone())
        .build()
        .expect("worker builds");
    worker
}

/// 조건이 참이 될 때까지 기다립니다.
async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// 게이트웨이 → 큐 → 워커 → SQLite 흐름 테스트
#[tokio::test]
async fn test_queued_batch_is_persisted_once_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("logs.db")).unwrap();
    let queue = MemoryQueue::new("logs:stream");
    let dlq = MemoryQueue::new("logs:dlq");
    queue.ensure_group(GROUP, StartPosition::New).await.unwrap();

    let gateway = IngestGateway::new(queue.clone(), BulkResolver::new(store.clone()));
    let batch = vec![
        record("a", "billing"),
        record("b", "billing"),
        record("c", "search"),
    ];
    let receipt = gateway.submit(batch).await.unwrap();
    assert_eq!(receipt.path, IngestPath::Queued);
    assert_eq!(receipt.accepted, 3);

    let mut worker = worker(&queue, &dlq, &store, "c1");
    worker.start().await.unwrap();
    wait_until(|| async { store.count_logs(&LogFilter::default()).await.unwrap() == 3 }).await;
    worker.stop().await.unwrap();

    let apps = store.list_apps(0, 10).await.unwrap();
    let logs = store.query_logs(&LogFilter::default(), 0, 10).await.unwrap();
    assert_eq!(logs.len(), 3);
    for log in &logs {
        let app = apps.iter().find(|a| a.id == log.app_id).unwrap();
        assert_eq!(app.name, log.app);
    }
    assert_eq!(queue.pending_count(GROUP).await.unwrap(), 0);
    assert_eq!(dlq.len().await.unwrap(), 0);
}

/// 큐에 연결할 수 없으면 직접 저장 경로를 사용
#[tokio::test]
async fn test_unreachable_queue_uses_direct_path() {
    let store = MemoryStore::new();
    let queue = RedisStreamQueue::open("redis://127.0.0.1:1/", "logs:stream").unwrap();
    let gateway = IngestGateway::new(queue, BulkResolver::new(store.clone()));

    let receipt = gateway
        .submit(vec![record("a", "demo"), record("b", "demo")])
        .await
        .unwrap();
    assert_eq!(receipt.path, IngestPath::Direct);
    assert_eq!(receipt.accepted, 2);
    assert_eq!(store.count_logs(&LogFilter::default()).await.unwrap(), 2);
}

/// 재시작한 워커는 새 엔트리보다 자신의 pending 엔트리를 먼저 처리
#[tokio::test]
async fn test_restarted_worker_recovers_pending_before_new() {
    let store = MemoryStore::new();
    let queue = MemoryQueue::new("logs:stream");
    let dlq = MemoryQueue::new("logs:dlq");
    queue.ensure_group(GROUP, StartPosition::New).await.unwrap();

    for i in 0..4 {
        queue
            .enqueue(QueueEnvelope::wrap(&record(&format!("old-{i}"), "demo")).unwrap())
            .await
            .unwrap();
    }
    // 크래시 전: 읽기만 하고 ack하지 않음
    let in_flight = queue
        .read_new(GROUP, "c1", 50, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(in_flight.len(), 4);
    for i in 0..2 {
        queue
            .enqueue(QueueEnvelope::wrap(&record(&format!("new-{i}"), "demo")).unwrap())
            .await
            .unwrap();
    }

    let mut restarted = worker(&queue, &dlq, &store, "c1");
    restarted.start().await.unwrap();
    wait_until(|| async { store.count_logs(&LogFilter::default()).await.unwrap() == 6 }).await;
    restarted.stop().await.unwrap();

    let messages: Vec<String> = store
        .query_logs(&LogFilter::default(), 0, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.message)
        .collect();
    assert_eq!(
        messages,
        vec!["old-0", "old-1", "old-2", "old-3", "new-0", "new-1"]
    );
}

/// 디코딩 불가 엔트리 하나만 데드레터로 격리
#[tokio::test]
async fn test_decode_failure_dead_letters_one_entry() {
    let store = MemoryStore::new();
    let queue = MemoryQueue::new("logs:stream");
    let dlq = MemoryQueue::new("logs:dlq");
    queue.ensure_group(GROUP, StartPosition::New).await.unwrap();

    let mut batch = Vec::new();
    for i in 0..4 {
        batch.push(QueueEnvelope::wrap(&record(&format!("m{i}"), "demo")).unwrap());
    }
    batch.insert(2, Fields::from([("data".to_owned(), "not-json".to_owned())]));
    let ids = queue.enqueue_batch(batch).await.unwrap();

    let worker = worker(&queue, &dlq, &store, "c1");
    let entries = queue.read_new(GROUP, "c1", 50, Duration::ZERO).await.unwrap();
    let outcome = worker.process_batch(entries).await;
    assert_eq!(outcome.dead_lettered, 1);
    assert_eq!(outcome.persisted, 4);
    assert_eq!(outcome.acked, 5);

    let dead = DeadLetterSink::new(dlq.clone()).list(None, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].1.msg_id, ids[2]);
}

/// 스키마 검증 실패는 배치 전체를 데드레터로 보냄
#[tokio::test]
async fn test_validation_failure_dead_letters_whole_batch() {
    let store = MemoryStore::new();
    let queue = MemoryQueue::new("logs:stream");
    let dlq = MemoryQueue::new("logs:dlq");
    queue.ensure_group(GROUP, StartPosition::New).await.unwrap();

    let long_service = "s".repeat(200);
    let items = vec![
        record("ok", "demo"),
        json!({"level": "INFO", "message": "bad", "service": long_service, "app": "demo"}),
    ];
    for item in &items {
        queue.enqueue(QueueEnvelope::wrap(item).unwrap()).await.unwrap();
    }

    let mut worker = worker(&queue, &dlq, &store, "c1");
    worker.start().await.unwrap();
    wait_until(|| async { dlq.len().await.unwrap() == 2 }).await;
    worker.stop().await.unwrap();

    assert_eq!(store.count_logs(&LogFilter::default()).await.unwrap(), 0);
    assert_eq!(queue.pending_count(GROUP).await.unwrap(), 0);
    let dead = DeadLetterSink::new(dlq).list(None, 10).await.unwrap();
    assert!(dead.iter().all(|(_, d)| d.error.contains("service")));
}

/// 임계값 10, 구간 60초: 10번째에서 한 번만 발송
#[tokio::test]
async fn test_alert_fires_once_per_window() {
    let store = MemoryStore::new();
    let resolver = BulkResolver::new(store.clone());
    let rule = AlertRule::from_config(&AlertRuleConfig {
        key: "ERROR".to_owned(),
        level: None,
        service: None,
        threshold: 10,
        window_secs: 60,
    });
    let (evaluator, rx) = AlertEvaluatorBuilder::new()
        .config(EvaluatorConfig {
            interval: Duration::from_secs(5),
            rules: vec![rule],
        })
        .store(store.clone())
        .markers(MemoryMarkerStore::new())
        .build()
        .unwrap();
    let mut rx = rx.unwrap();

    let now = Utc::now();
    let make = |n: usize| {
        let items: Vec<Value> = (0..n).map(|i| record(&format!("e{i}"), "demo")).collect();
        logsluice_ingest::schema::validate_batch(&items, now).unwrap()
    };

    resolver.persist(make(10)).await.unwrap();
    assert_eq!(evaluator.evaluate_once(now).await.len(), 1);
    resolver.persist(make(1)).await.unwrap();
    assert!(evaluator.evaluate_once(now).await.is_empty());

    let notification = rx.recv().await.unwrap();
    assert_eq!(notification.rule_key, "ERROR");
    assert!(rx.try_recv().is_err());
}

/// 같은 배치의 새 앱 이름은 하나의 등록만 생성
#[tokio::test]
async fn test_same_new_app_registers_once() {
    let store = SqliteStore::open_in_memory().unwrap();
    let gateway = IngestGateway::new(
        RedisStreamQueue::open("redis://127.0.0.1:1/", "logs:stream").unwrap(),
        BulkResolver::new(store.clone()),
    );
    gateway
        .submit(vec![record("a", "demo"), record("b", "demo")])
        .await
        .unwrap();

    let apps = store.list_apps(0, 10).await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].name, "demo");
}

/// 앱 삭제는 해당 앱의 로그를 함께 삭제
#[tokio::test]
async fn test_deleting_app_cascades_to_logs() {
    let store = SqliteStore::open_in_memory().unwrap();
    let resolver = BulkResolver::new(store.clone());
    let now = Utc::now();
    let items = vec![record("a", "demo"), record("b", "other")];
    let saved = resolver
        .persist(logsluice_ingest::schema::validate_batch(&items, now).unwrap())
        .await
        .unwrap();

    store.delete_app(saved[0].app_id).await.unwrap();
    let filter = LogFilter {
        app: Some("demo".to_owned()),
        ..Default::default()
    };
    assert!(store.query_logs(&filter, 0, 10).await.unwrap().is_empty());
    assert_eq!(store.count_logs(&LogFilter::default()).await.unwrap(), 1);
}
