// File: fleet-server/src/store/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDescriptor {
    pub machine_id: String,
    pub os: String,
    pub arch: String,
    pub os_version: String,
    pub total_memory_bytes: u64,
    pub hardware_serial: Option<String>,
    pub local_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub ts: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub memory_percent: f64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_percent: f64,
    pub network_bytes_sent: u64,
    pub network_bytes_received: u64,
    pub battery_percent: Option<f64>,
    pub battery_plugged: Option<bool>,
    pub temperature_celsius: Option<f64>,
    pub uptime_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: String,
    pub info: MachineDescriptor,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Reachable,
    Timeout,
    Unreachable,
    Unhealthy,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbeResult {
    pub status: ProbeStatus,
    pub last_check_ts: DateTime<Utc>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub agent_version: Option<String>,
    pub agent_uptime_s: Option<u64>,
    pub responsive: bool,
    pub inner_payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinedLiveness {
    Healthy,
    ReportingButUnreachable,
    ReachableButNotReporting,
    Offline,
    Unhealthy,
    SlowResponse,
}

/// Implements the combined-liveness derivation exactly: report age against the
/// configured reporting timeout, crossed with the most recent probe status.
/// Evaluated fresh on every read; never cached alongside the machine record.
pub fn combined_liveness(
    now: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    reporting_timeout_seconds: i64,
    probe: Option<&HealthProbeResult>,
) -> CombinedLiveness {
    let age_seconds = (now - last_seen).num_seconds();
    let reporting = age_seconds < reporting_timeout_seconds;

    match probe.map(|p| p.status) {
        Some(ProbeStatus::Unhealthy) => CombinedLiveness::Unhealthy,
        Some(ProbeStatus::Timeout) => CombinedLiveness::SlowResponse,
        Some(ProbeStatus::Reachable) if reporting => CombinedLiveness::Healthy,
        Some(ProbeStatus::Reachable) => CombinedLiveness::ReachableButNotReporting,
        Some(ProbeStatus::Unreachable) if reporting => CombinedLiveness::ReportingButUnreachable,
        Some(ProbeStatus::Unreachable) => CombinedLiveness::Offline,
        Some(ProbeStatus::Error) if reporting => CombinedLiveness::ReportingButUnreachable,
        Some(ProbeStatus::Error) => CombinedLiveness::Offline,
        None if reporting => CombinedLiveness::Healthy,
        None => CombinedLiveness::Offline,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub ts: DateTime<Utc>,
    pub alert_type: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub message: String,
    pub machine_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub issued_ts: DateTime<Utc>,
    pub ack_ts: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineView {
    pub machine_id: String,
    pub info: MachineDescriptor,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub latest_metrics: Option<MetricSample>,
    pub probe: Option<HealthProbeResult>,
    pub liveness: CombinedLiveness,
}

/// One administrative action recorded against the server: a login, a logout,
/// or an operator-issued command dispatch. Kept separately from `Alert`
/// (machine-health-derived) since this is an account/security trail, not a
/// monitoring signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub actor: String,
    pub machine_id: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    pub total_machines: usize,
    pub healthy: usize,
    pub reporting_but_unreachable: usize,
    pub reachable_but_not_reporting: usize,
    pub offline: usize,
    pub unhealthy: usize,
    pub slow_response: usize,
    pub dropped_reports: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn probe(status: ProbeStatus) -> HealthProbeResult {
        HealthProbeResult {
            status,
            last_check_ts: Utc::now(),
            latency_ms: Some(10),
            error: None,
            agent_version: None,
            agent_uptime_s: None,
            responsive: true,
            inner_payload: None,
        }
    }

    #[test]
    fn healthy_when_reporting_and_reachable() {
        let now = Utc::now();
        let liveness = combined_liveness(now, now, 60, Some(&probe(ProbeStatus::Reachable)));
        assert_eq!(liveness, CombinedLiveness::Healthy);
    }

    #[test]
    fn reporting_but_unreachable_when_fresh_and_probe_unreachable() {
        let now = Utc::now();
        let liveness = combined_liveness(now, now, 60, Some(&probe(ProbeStatus::Unreachable)));
        assert_eq!(liveness, CombinedLiveness::ReportingButUnreachable);
    }

    #[test]
    fn reachable_but_not_reporting_when_stale_and_probe_reachable() {
        let now = Utc::now();
        let last_seen = now - Duration::seconds(120);
        let liveness = combined_liveness(now, last_seen, 60, Some(&probe(ProbeStatus::Reachable)));
        assert_eq!(liveness, CombinedLiveness::ReachableButNotReporting);
    }

    #[test]
    fn offline_when_stale_and_probe_unreachable_or_timeout() {
        let now = Utc::now();
        let last_seen = now - Duration::seconds(120);
        assert_eq!(
            combined_liveness(now, last_seen, 60, Some(&probe(ProbeStatus::Unreachable))),
            CombinedLiveness::Offline
        );
    }

    #[test]
    fn unhealthy_overrides_reporting_freshness() {
        let now = Utc::now();
        let liveness = combined_liveness(now, now, 60, Some(&probe(ProbeStatus::Unhealthy)));
        assert_eq!(liveness, CombinedLiveness::Unhealthy);
    }

    #[test]
    fn timeout_probe_is_slow_response() {
        let now = Utc::now();
        let liveness = combined_liveness(now, now, 60, Some(&probe(ProbeStatus::Timeout)));
        assert_eq!(liveness, CombinedLiveness::SlowResponse);
    }

    #[test]
    fn no_probe_yet_falls_back_to_report_freshness() {
        let now = Utc::now();
        assert_eq!(combined_liveness(now, now, 60, None), CombinedLiveness::Healthy);
        let stale = now - Duration::seconds(120);
        assert_eq!(combined_liveness(now, stale, 60, None), CombinedLiveness::Offline);
    }
}
