//! 레코드 스키마 -- 본문 디코딩, 형태 검사, 전체 검증
//!
//! 게이트웨이는 부수 효과 전에 [`check_shape`]로 필수 필드의 존재만 확인하고,
//! 타입과 길이 검증은 [`validate_batch`]가 워커(또는 직접 저장 경로)에서 수행합니다.
//!
//! # 필드 제약
//! | 필드 | 제약 |
//! |---|---|
//! | `level` | 비어 있지 않음, 최대 20자 |
//! | `service` | 비어 있지 않음, 최대 50자 |
//! | `message` | 비어 있지 않음, 최대 255자 |
//! | `app` | 있으면 비어 있지 않음, 최대 100자 |
//! | `app_id` | 있으면 양의 정수 |
//! | `metadata` / `metadata_` | 선택, JSON 객체 |
//! | `timestamp` | 선택, RFC 3339 (없으면 수집 시각) |

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use logsluice_core::types::{AppRef, LogLevel, NewLogRecord};

use crate::error::{IngestError, ItemFailure};

/// `level` 최대 길이
pub const MAX_LEVEL_LEN: usize = 20;
/// `service` 최대 길이
pub const MAX_SERVICE_LEN: usize = 50;
/// `message` 최대 길이
pub const MAX_MESSAGE_LEN: usize = 255;
/// `app` 최대 길이
pub const MAX_APP_LEN: usize = 100;

const REQUIRED_FIELDS: [&str; 3] = ["level", "message", "service"];

/// 요청 본문을 후보 레코드 목록으로 디코딩합니다.
///
/// 먼저 하나의 JSON 문서로 해석하고(배열은 그대로, 그 외는 1개짜리 배치),
/// 실패하면 줄 단위 NDJSON으로 해석합니다. 빈 줄은 건너뜁니다.
pub fn decode_body(body: &[u8]) -> Result<Vec<Value>, IngestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::malformed("empty payload", Vec::new()));
    }
    if let Ok(doc) = serde_json::from_slice::<Value>(body) {
        return Ok(match doc {
            Value::Array(items) => items,
            other => vec![other],
        });
    }
    let invalid = || IngestError::malformed("invalid json or ndjson payload", Vec::new());
    let text = std::str::from_utf8(body).map_err(|_| invalid())?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str::<Value>(line).map_err(|_| invalid()))
        .collect()
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// 항목 하나의 형태 검사 실패 사유
fn shape_failure(item: &Value) -> Option<String> {
    let Some(obj) = item.as_object() else {
        return Some("not an object".to_owned());
    };
    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| is_blank(obj.get(*field)))
        .collect();
    if !missing.is_empty() {
        return Some(format!("missing required fields: {}", missing.join("/")));
    }
    if is_blank(obj.get("app")) && is_blank(obj.get("app_id")) {
        return Some("either app or app_id must be provided".to_owned());
    }
    None
}

/// 배치 전체의 형태를 검사합니다.
///
/// 실패한 모든 항목을 담은 [`IngestError::MalformedBatch`]를 반환합니다.
pub fn check_shape(items: &[Value]) -> Result<(), IngestError> {
    if items.is_empty() {
        return Err(IngestError::malformed("empty payload", Vec::new()));
    }
    let failures: Vec<ItemFailure> = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| shape_failure(item).map(|reason| ItemFailure::new(index, reason)))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(IngestError::malformed(
            format!("{} of {} items invalid", failures.len(), items.len()),
            failures,
        ))
    }
}

fn bounded_string(
    obj: &Map<String, Value>,
    field: &str,
    max: usize,
    errors: &mut Vec<String>,
) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => {
            errors.push(format!("{field} is required"));
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            errors.push(format!("{field} must not be empty"));
            None
        }
        Some(Value::String(s)) if s.chars().count() > max => {
            errors.push(format!("{field} exceeds {max} characters"));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(format!("{field} must be a string"));
            None
        }
    }
}

fn parse_app_id(value: &Value) -> Result<i64, String> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| "app_id must be an integer".to_owned())?;
    if id <= 0 {
        return Err("app_id must be positive".to_owned());
    }
    Ok(id)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // 오프셋 없는 시각은 UTC로 간주
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// 레코드 하나를 검증합니다. 실패 시 모든 사유를 `; `로 이어 반환합니다.
pub fn validate_record(item: &Value, now: DateTime<Utc>) -> Result<NewLogRecord, String> {
    let obj = item.as_object().ok_or_else(|| "not an object".to_owned())?;
    let mut errors = Vec::new();

    let level = bounded_string(obj, "level", MAX_LEVEL_LEN, &mut errors);
    let message = bounded_string(obj, "message", MAX_MESSAGE_LEN, &mut errors);
    let service = bounded_string(obj, "service", MAX_SERVICE_LEN, &mut errors);

    let app_name = if is_blank(obj.get("app")) {
        None
    } else {
        bounded_string(obj, "app", MAX_APP_LEN, &mut errors)
    };
    let app_id = match obj.get("app_id") {
        None | Some(Value::Null) => None,
        Some(value) => parse_app_id(value).map_err(|e| errors.push(e)).ok(),
    };
    let app = match (app_id, app_name) {
        (Some(id), Some(name)) => Some(AppRef::Both { id, name }),
        (Some(id), None) => Some(AppRef::Id(id)),
        (None, Some(name)) => Some(AppRef::Name(name)),
        (None, None) => {
            if is_blank(obj.get("app")) && matches!(obj.get("app_id"), None | Some(Value::Null)) {
                errors.push("either app or app_id must be provided".to_owned());
            }
            None
        }
    };

    let metadata = match obj.get("metadata").or_else(|| obj.get("metadata_")) {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            errors.push("metadata must be an object".to_owned());
            None
        }
    };

    let timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => Some(now),
        Some(Value::String(raw)) => {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                errors.push(format!("invalid timestamp '{raw}'"));
            }
            parsed
        }
        Some(_) => {
            errors.push("timestamp must be a string".to_owned());
            None
        }
    };

    match (level, message, service, app, timestamp) {
        (Some(level), Some(message), Some(service), Some(app), Some(timestamp))
            if errors.is_empty() =>
        {
            Ok(NewLogRecord {
                level: LogLevel::parse(&level),
                message,
                service,
                app,
                metadata,
                timestamp,
            })
        }
        _ => Err(errors.join("; ")),
    }
}

/// 배치 전체를 검증합니다.
///
/// 하나라도 실패하면 모든 실패 항목을 담은 [`IngestError::Validation`]을 반환합니다.
/// `timestamp`가 없는 레코드는 모두 `now`를 받습니다.
pub fn validate_batch(items: &[Value], now: DateTime<Utc>) -> Result<Vec<NewLogRecord>, IngestError> {
    let mut records = Vec::with_capacity(items.len());
    let mut failures = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match validate_record(item, now) {
            Ok(record) => records.push(record),
            Err(reason) => failures.push(ItemFailure::new(index, reason)),
        }
    }
    if failures.is_empty() {
        Ok(records)
    } else {
        Err(IngestError::Validation { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap()
    }

    fn valid() -> Value {
        json!({"level": "error", "message": "disk full", "service": "storage", "app": "demo"})
    }

    #[test]
    fn decode_array_object_and_ndjson() {
        assert_eq!(decode_body(br#"[{"a":1},{"a":2}]"#).unwrap().len(), 2);
        assert_eq!(decode_body(br#"{"a":1}"#).unwrap().len(), 1);
        let ndjson = b"{\"a\":1}\n\n{\"a\":2}\n  {\"a\":3}  \n";
        assert_eq!(decode_body(ndjson).unwrap().len(), 3);
    }

    #[test]
    fn decode_rejects_empty_and_garbage() {
        let err = decode_body(b"  \n").unwrap_err();
        assert!(err.to_string().contains("empty payload"));
        let err = decode_body(b"{\"a\":1}\nnot json").unwrap_err();
        assert!(err.to_string().contains("invalid json or ndjson payload"));
    }

    #[test]
    fn shape_check_lists_all_failing_indices() {
        let items = vec![
            valid(),
            json!("string item"),
            json!({"level": "INFO", "message": "", "service": "api", "app": "demo"}),
            json!({"level": "INFO", "message": "m", "service": "api"}),
        ];
        let err = check_shape(&items).unwrap_err();
        let IngestError::MalformedBatch { failures, .. } = err else {
            panic!("expected malformed batch");
        };
        let indices: Vec<usize> = failures.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(failures[1].reason.contains("message"));
    }

    #[test]
    fn shape_check_accepts_app_id_only() {
        let items = vec![json!({"level": "INFO", "message": "m", "service": "api", "app_id": 4})];
        assert!(check_shape(&items).is_ok());
        assert!(check_shape(&[]).is_err());
    }

    #[test]
    fn shape_check_ignores_types() {
        // 타입 검증은 워커의 몫
        let items = vec![json!({"level": 5, "message": "m", "service": "api", "app": "demo"})];
        assert!(check_shape(&items).is_ok());
        assert!(validate_batch(&items, now()).is_err());
    }

    #[test]
    fn validate_normalizes_and_defaults_timestamp() {
        let record = validate_record(&valid(), now()).unwrap();
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.app, AppRef::Name("demo".to_owned()));
        assert_eq!(record.timestamp, now());
        assert!(record.metadata.is_none());
    }

    #[test]
    fn validate_accepts_legacy_metadata_key_and_both_app_refs() {
        let item = json!({
            "level": "INFO", "message": "m", "service": "api",
            "app": "demo", "app_id": "7",
            "metadata_": {"user": "u1"},
            "timestamp": "2024-01-01T00:00:00Z"
        });
        let record = validate_record(&item, now()).unwrap();
        assert_eq!(
            record.app,
            AppRef::Both {
                id: 7,
                name: "demo".to_owned()
            }
        );
        assert_eq!(record.metadata.unwrap()["user"], "u1");
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap()
        );
    }

    #[test]
    fn validate_accepts_naive_timestamp_as_utc() {
        let mut item = valid();
        item["timestamp"] = json!("2024-01-01T08:30:00.250");
        let record = validate_record(&item, now()).unwrap();
        assert_eq!(record.timestamp.to_rfc3339(), "2024-01-01T08:30:00.250+00:00");
    }

    #[test]
    fn validate_enforces_lengths_and_types() {
        let item = json!({
            "level": "x".repeat(MAX_LEVEL_LEN + 1),
            "message": "m",
            "service": "s".repeat(MAX_SERVICE_LEN + 1),
            "app_id": -3,
            "metadata": [1, 2],
            "timestamp": "yesterday"
        });
        let reason = validate_record(&item, now()).unwrap_err();
        for needle in ["level exceeds", "service exceeds", "app_id must be positive", "metadata", "timestamp"] {
            assert!(reason.contains(needle), "missing '{needle}' in {reason}");
        }
    }

    #[test]
    fn validate_batch_reports_every_failure() {
        let items = vec![valid(), json!({"level": "INFO"}), valid(), json!(3)];
        let err = validate_batch(&items, now()).unwrap_err();
        let IngestError::Validation { failures } = err else {
            panic!("expected validation error");
        };
        assert_eq!(failures.iter().map(|f| f.index).collect::<Vec<_>>(), vec![1, 3]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_arbitrary_bytes_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..1000)) {
                let _ = decode_body(&bytes);
            }

            #[test]
            fn message_within_limit_is_accepted(message in "[a-zA-Z0-9 ]{1,255}") {
                prop_assume!(!message.trim().is_empty());
                let item = json!({"level": "INFO", "message": message.clone(), "service": "api", "app_id": 1});
                let record = validate_record(&item, now()).unwrap();
                prop_assert_eq!(record.message, message);
            }

            #[test]
            fn ndjson_yields_one_item_per_line(n in 1usize..50) {
                let body: String = (0..n).map(|i| format!("{{\"i\":{i}}}\n")).collect();
                let items = decode_body(body.as_bytes()).unwrap();
                prop_assert_eq!(items.len(), n);
            }
        }
    }
}
