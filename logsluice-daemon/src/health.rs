//! Daemon health reporting.
//!
//! The orchestrator polls every registered module and folds the results
//! into one [`DaemonHealth`]. The daemon is only as healthy as its worst
//! enabled module: any `Unhealthy` module wins over `Degraded` ones, and
//! the reasons of every module at that worst level are kept, joined by `"; "`.

use serde::Serialize;

use logsluice_core::pipeline::HealthStatus;

/// Health snapshot of the whole daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Worst status among enabled modules.
    pub status: HealthStatus,
    /// Seconds since the orchestrator was built.
    pub uptime_secs: u64,
    /// Status of each registered module, in registration order.
    pub modules: Vec<ModuleHealth>,
}

/// Health of one registered module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleHealth {
    /// Module name ("batch-worker", "alert-evaluator").
    pub name: String,
    /// Disabled modules never affect the aggregate.
    pub enabled: bool,
    /// Last reported status.
    pub status: HealthStatus,
}

fn severity(status: &HealthStatus) -> u8 {
    match status {
        HealthStatus::Healthy => 0,
        HealthStatus::Degraded(_) => 1,
        HealthStatus::Unhealthy(_) => 2,
    }
}

fn reason(status: &HealthStatus) -> &str {
    match status {
        HealthStatus::Healthy => "",
        HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => reason,
    }
}

/// Fold module statuses into the daemon status.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let enabled = || modules.iter().filter(|m| m.enabled);

    let worst = enabled().map(|m| severity(&m.status)).max().unwrap_or(0);
    let reasons = enabled()
        .filter(|m| severity(&m.status) == worst)
        .map(|m| format!("{}: {}", m.name, reason(&m.status)))
        .collect::<Vec<_>>()
        .join("; ");

    match worst {
        0 => HealthStatus::Healthy,
        1 => HealthStatus::Degraded(reasons),
        _ => HealthStatus::Unhealthy(reasons),
    }
}

/// Log a health snapshot; the level follows the daemon status.
pub fn log_health(health: &DaemonHealth) {
    match &health.status {
        HealthStatus::Healthy => tracing::debug!(
            uptime_secs = health.uptime_secs,
            modules = health.modules.len(),
            "daemon healthy"
        ),
        HealthStatus::Degraded(reason) => tracing::warn!(
            uptime_secs = health.uptime_secs,
            reason = %reason,
            "daemon degraded"
        ),
        HealthStatus::Unhealthy(reason) => tracing::error!(
            uptime_secs = health.uptime_secs,
            reason = %reason,
            "daemon unhealthy"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_reasons_are_joined() {
        let modules = vec![
            ModuleHealth {
                name: "a".to_owned(),
                enabled: true,
                status: HealthStatus::Degraded("x".to_owned()),
            },
            ModuleHealth {
                name: "b".to_owned(),
                enabled: true,
                status: HealthStatus::Degraded("y".to_owned()),
            },
        ];
        assert_eq!(
            aggregate_status(&modules),
            HealthStatus::Degraded("a: x; b: y".to_owned())
        );
    }
}
