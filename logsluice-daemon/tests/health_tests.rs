//! Health aggregation tests.

use logsluice_core::pipeline::HealthStatus;
use logsluice_daemon::health::{ModuleHealth, aggregate_status};

fn module(name: &str, enabled: bool, status: HealthStatus) -> ModuleHealth {
    ModuleHealth {
        name: name.to_owned(),
        enabled,
        status,
    }
}

#[test]
fn test_aggregate_status_all_healthy() {
    let modules = vec![
        module("batch-worker", true, HealthStatus::Healthy),
        module("alert-evaluator", true, HealthStatus::Healthy),
    ];
    assert!(aggregate_status(&modules).is_healthy());
}

#[test]
fn test_aggregate_status_degraded_markers() {
    let modules = vec![
        module("batch-worker", true, HealthStatus::Healthy),
        module(
            "alert-evaluator",
            true,
            HealthStatus::Degraded("marker store unreachable".to_owned()),
        ),
    ];

    match aggregate_status(&modules) {
        HealthStatus::Degraded(reason) => {
            assert_eq!(reason, "alert-evaluator: marker store unreachable");
        }
        other => panic!("expected degraded, got {other:?}"),
    }
}

#[test]
fn test_aggregate_status_unhealthy_takes_precedence_over_degraded() {
    let modules = vec![
        module(
            "alert-evaluator",
            true,
            HealthStatus::Degraded("marker store unreachable".to_owned()),
        ),
        module(
            "batch-worker",
            true,
            HealthStatus::Unhealthy("queue ping failed".to_owned()),
        ),
    ];

    match aggregate_status(&modules) {
        HealthStatus::Unhealthy(reason) => {
            assert_eq!(reason, "batch-worker: queue ping failed");
        }
        other => panic!("expected unhealthy, got {other:?}"),
    }
}

#[test]
fn test_aggregate_status_combines_unhealthy_reasons() {
    let modules = vec![
        module("batch-worker", true, HealthStatus::Unhealthy("stopped".to_owned())),
        module("alert-evaluator", true, HealthStatus::Unhealthy("stopped".to_owned())),
    ];

    match aggregate_status(&modules) {
        HealthStatus::Unhealthy(reason) => {
            assert_eq!(reason, "batch-worker: stopped; alert-evaluator: stopped");
        }
        other => panic!("expected unhealthy, got {other:?}"),
    }
}

#[test]
fn test_aggregate_status_disabled_modules_ignored() {
    let modules = vec![
        module("batch-worker", true, HealthStatus::Healthy),
        module("alert-evaluator", false, HealthStatus::Unhealthy("not started".to_owned())),
    ];
    assert!(aggregate_status(&modules).is_healthy());
}

#[test]
fn test_aggregate_status_empty_modules() {
    assert!(aggregate_status(&[]).is_healthy());
}
