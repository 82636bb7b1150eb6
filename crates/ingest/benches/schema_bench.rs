//! 요청 본문 디코딩 및 스키마 검증 벤치마크
//!
//! JSON 배열, NDJSON 디코딩과 배치 검증의 처리량을 측정합니다.

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use logsluice_ingest::schema::{check_shape, decode_body, validate_batch};
use serde_json::{Value, json};

fn record(i: usize) -> Value {
    json!({
        "level": if i % 10 == 0 { "ERROR" } else { "INFO" },
        "message": format!("request {i} completed in {}ms", i % 250),
        "service": "api-gateway",
        "app": format!("app-{}", i % 8),
        "metadata": {"request_id": format!("req-{i}"), "status": 200},
        "timestamp": "2024-01-15T12:00:00.123456Z"
    })
}

fn json_array(n: usize) -> Vec<u8> {
    let items: Vec<Value> = (0..n).map(record).collect();
    serde_json::to_vec(&items).unwrap()
}

fn ndjson(n: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for i in 0..n {
        body.extend(serde_json::to_vec(&record(i)).unwrap());
        body.push(b'\n');
    }
    body
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_body");
    for size in [10, 100, 1000] {
        let array = json_array(size);
        let lines = ndjson(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("json_array", size), &array, |b, body| {
            b.iter(|| decode_body(black_box(body)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("ndjson", size), &lines, |b, body| {
            b.iter(|| decode_body(black_box(body)).unwrap())
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_batch");
    let now = Utc::now();
    for size in [10, 100, 1000] {
        let items: Vec<Value> = (0..size).map(record).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("check_shape", size), &items, |b, items| {
            b.iter(|| check_shape(black_box(items)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("full", size), &items, |b, items| {
            b.iter(|| validate_batch(black_box(items), now).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_validate);
criterion_main!(benches);
