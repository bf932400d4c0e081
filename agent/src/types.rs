// File: agent/src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

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
pub struct ReportBody {
    pub machine_id: String,
    pub machine_info: MachineDescriptor,
    pub metrics: MetricSample,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub status: String,
    pub agent_version: String,
    pub uptime_s: u64,
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub fleet_server_url: String,
    pub last_fleet_report_ts: Option<DateTime<Utc>>,
    pub monitors: std::collections::BTreeMap<String, bool>,
    pub system: AgentHealthSystem,
    pub responsive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealthSystem {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub mem_avail_gb: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorActionRequest {
    pub idempotency_key: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorActionAccepted {
    pub action_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WidgetLogEvent {
    pub ts: DateTime<Utc>,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Value,
}
