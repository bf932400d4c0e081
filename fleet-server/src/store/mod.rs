// File: fleet-server/src/store/mod.rs
//
// The machine registry: the Fleet Server's only piece of shared mutable
// state. Grounded on the reference workspace's `Arc<Mutex<HashMap<...>>>`
// idiom for per-entity state (the node manager's cooldown and block-height
// maps) — an outer `RwLock` for the map shape, an inner `Mutex` per entry so
// one machine's write never blocks another machine's read or write.
pub mod types;

use self::types::{
    combined_liveness, Alert, AuditEntry, CommandEnvelope, FleetSummary, HealthProbeResult, Machine,
    MachineDescriptor, MachineView, MetricSample,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub const HISTORY_CAP: usize = 100;
pub const COMMAND_QUEUE_CAP: usize = 50;
pub const ALERT_RETENTION_DAYS: i64 = 30;
pub const AUDIT_RETENTION_DAYS: i64 = 30;
pub const WIDGET_LOG_CAP: usize = 500;
pub const WIDGET_LOG_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WidgetLogEntry {
    pub ts: DateTime<Utc>,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("machine {0} is not known to the registry")]
    UnknownMachine(String),
    #[error("command queue for {0} is full")]
    QueueFull(String),
    #[error("command {command_id} not found for machine {machine_id}")]
    UnknownCommand { machine_id: String, command_id: String },
}

struct MachineEntry {
    machine: Machine,
    history: VecDeque<MetricSample>,
    probe: Option<HealthProbeResult>,
    commands: VecDeque<CommandEnvelope>,
    widget_logs: VecDeque<WidgetLogEntry>,
}

pub struct Store {
    machines: RwLock<HashMap<String, Arc<Mutex<MachineEntry>>>>,
    alerts: RwLock<VecDeque<Alert>>,
    audit: RwLock<VecDeque<AuditEntry>>,
    reporting_timeout_seconds: i64,
    dropped_reports: AtomicU64,
}

impl Store {
    pub fn new(reporting_timeout_seconds: i64) -> Self {
        Self {
            machines: RwLock::new(HashMap::new()),
            alerts: RwLock::new(VecDeque::new()),
            audit: RwLock::new(VecDeque::new()),
            reporting_timeout_seconds,
            dropped_reports: AtomicU64::new(0),
        }
    }

    pub fn record_dropped_report(&self) {
        self.dropped_reports.fetch_add(1, Ordering::Relaxed);
    }

    /// Inserts or refreshes a machine's report. `last_seen` moves monotonically
    /// (max of current and incoming) even when samples arrive out of order;
    /// out-of-order samples are stored with their own reported timestamp and
    /// never rejected.
    pub async fn upsert_report(&self, machine_id: &str, info: MachineDescriptor, sample: MetricSample) {
        let entry = self.entry_for(machine_id).await;
        let mut entry = entry.lock().await;
        entry.machine.info = info;
        if sample.ts > entry.machine.last_seen {
            entry.machine.last_seen = sample.ts;
        }
        entry.history.push_back(sample);
        while entry.history.len() > HISTORY_CAP {
            entry.history.pop_front();
        }
    }

    pub async fn update_health_probe(&self, machine_id: &str, probe: HealthProbeResult) {
        if let Some(entry) = self.lookup(machine_id).await {
            let mut entry = entry.lock().await;
            entry.probe = Some(probe);
        }
    }

    pub async fn get_machine(&self, machine_id: &str) -> Option<MachineView> {
        let entry = self.lookup(machine_id).await?;
        let entry = entry.lock().await;
        Some(self.view_of(&entry))
    }

    pub async fn list_machines(&self) -> Vec<MachineView> {
        let map = self.machines.read().await;
        let mut views = Vec::with_capacity(map.len());
        for entry in map.values() {
            let entry = entry.lock().await;
            views.push(self.view_of(&entry));
        }
        views
    }

    pub async fn fleet_summary(&self) -> FleetSummary {
        let views = self.list_machines().await;
        let mut summary = FleetSummary {
            total_machines: views.len(),
            healthy: 0,
            reporting_but_unreachable: 0,
            reachable_but_not_reporting: 0,
            offline: 0,
            unhealthy: 0,
            slow_response: 0,
            dropped_reports: self.dropped_reports.load(Ordering::Relaxed),
        };
        for view in &views {
            use types::CombinedLiveness::*;
            match view.liveness {
                Healthy => summary.healthy += 1,
                ReportingButUnreachable => summary.reporting_but_unreachable += 1,
                ReachableButNotReporting => summary.reachable_but_not_reporting += 1,
                Offline => summary.offline += 1,
                Unhealthy => summary.unhealthy += 1,
                SlowResponse => summary.slow_response += 1,
            }
        }
        summary
    }

    pub async fn enqueue_command(&self, machine_id: &str, command: CommandEnvelope) -> Result<(), StoreError> {
        let entry = self
            .lookup(machine_id)
            .await
            .ok_or_else(|| StoreError::UnknownMachine(machine_id.to_string()))?;
        let mut entry = entry.lock().await;
        if entry.commands.len() >= COMMAND_QUEUE_CAP {
            return Err(StoreError::QueueFull(machine_id.to_string()));
        }
        entry.commands.push_back(command);
        Ok(())
    }

    pub async fn dequeue_commands(&self, machine_id: &str) -> Vec<CommandEnvelope> {
        match self.lookup(machine_id).await {
            Some(entry) => entry.lock().await.commands.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn ack_command(
        &self,
        machine_id: &str,
        command_id: &str,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let entry = self
            .lookup(machine_id)
            .await
            .ok_or_else(|| StoreError::UnknownMachine(machine_id.to_string()))?;
        let mut entry = entry.lock().await;
        let now = Utc::now();
        let found = entry.commands.iter_mut().find(|c| c.command_id == command_id);
        match found {
            Some(cmd) => {
                cmd.ack_ts = Some(now);
                cmd.result = Some(result);
                entry.commands.retain(|c| c.ack_ts.is_none());
                Ok(())
            }
            None => Err(StoreError::UnknownCommand {
                machine_id: machine_id.to_string(),
                command_id: command_id.to_string(),
            }),
        }
    }

    pub async fn push_alert(&self, alert: Alert) {
        let mut alerts = self.alerts.write().await;
        alerts.push_back(alert);
        let cutoff = Utc::now() - chrono::Duration::days(ALERT_RETENTION_DAYS);
        while alerts.front().is_some_and(|a| a.ts < cutoff) {
            alerts.pop_front();
        }
    }

    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let alerts = self.alerts.read().await;
        alerts.iter().rev().take(limit).cloned().collect()
    }

    pub async fn push_audit(&self, entry: AuditEntry) {
        let mut audit = self.audit.write().await;
        audit.push_back(entry);
        let cutoff = Utc::now() - chrono::Duration::days(AUDIT_RETENTION_DAYS);
        while audit.front().is_some_and(|a| a.ts < cutoff) {
            audit.pop_front();
        }
    }

    pub async fn recent_audit(&self, limit: usize) -> Vec<AuditEntry> {
        let audit = self.audit.read().await;
        audit.iter().rev().take(limit).cloned().collect()
    }

    async fn lookup(&self, machine_id: &str) -> Option<Arc<Mutex<MachineEntry>>> {
        self.machines.read().await.get(machine_id).cloned()
    }

    async fn entry_for(&self, machine_id: &str) -> Arc<Mutex<MachineEntry>> {
        if let Some(entry) = self.lookup(machine_id).await {
            return entry;
        }
        let mut map = self.machines.write().await;
        map.entry(machine_id.to_string())
            .or_insert_with(|| {
                let now = Utc::now();
                Arc::new(Mutex::new(MachineEntry {
                    machine: Machine {
                        machine_id: machine_id.to_string(),
                        info: MachineDescriptor {
                            machine_id: machine_id.to_string(),
                            os: String::new(),
                            arch: String::new(),
                            os_version: String::new(),
                            total_memory_bytes: 0,
                            hardware_serial: None,
                            local_ip: None,
                        },
                        first_seen: now,
                        last_seen: now,
                    },
                    history: VecDeque::new(),
                    probe: None,
                    commands: VecDeque::new(),
                    widget_logs: VecDeque::new(),
                }))
            })
            .clone()
    }

    /// Appends widget-log events for a machine, same envelope policy as
    /// reports, with its own shorter retention window.
    pub async fn append_widget_logs(&self, machine_id: &str, events: Vec<WidgetLogEntry>) {
        let entry = self.entry_for(machine_id).await;
        let mut entry = entry.lock().await;
        let cutoff = Utc::now() - chrono::Duration::days(WIDGET_LOG_RETENTION_DAYS);
        entry.widget_logs.extend(events);
        while entry.widget_logs.front().is_some_and(|e| e.ts < cutoff) {
            entry.widget_logs.pop_front();
        }
        while entry.widget_logs.len() > WIDGET_LOG_CAP {
            entry.widget_logs.pop_front();
        }
    }

    pub async fn widget_logs(&self, machine_id: &str) -> Vec<WidgetLogEntry> {
        match self.lookup(machine_id).await {
            Some(entry) => entry.lock().await.widget_logs.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    fn view_of(&self, entry: &MachineEntry) -> MachineView {
        let now = Utc::now();
        let liveness = combined_liveness(
            now,
            entry.machine.last_seen,
            self.reporting_timeout_seconds,
            entry.probe.as_ref(),
        );
        MachineView {
            machine_id: entry.machine.machine_id.clone(),
            info: entry.machine.info.clone(),
            first_seen: entry.machine.first_seen,
            last_seen: entry.machine.last_seen,
            latest_metrics: entry.history.back().cloned(),
            probe: entry.probe.clone(),
            liveness,
        }
    }

    /// Serializes the whole registry (and alert stream) to JSON, sealing it
    /// with the config-at-rest envelope when `key` is provided. Matches the
    /// "write new, rename" atomicity contract used by the CSV ring-log.
    pub async fn persist_now(&self, path: &std::path::Path, key: Option<&[u8; crate::crypto::KEY_LEN]>) -> anyhow::Result<()> {
        let snapshot = self.snapshot().await;
        let plaintext = serde_json::to_vec(&snapshot)?;
        let bytes = match key {
            Some(key) => {
                let sealed = crate::crypto::seal(key, &plaintext, crate::crypto::EnvelopeKind::ConfigAtRest)?;
                serde_json::to_vec(&sealed)?
            }
            None => plaintext,
        };
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    pub async fn load_on_start(&self, path: &std::path::Path, key: Option<&[u8; crate::crypto::KEY_LEN]>) -> anyhow::Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let bytes = tokio::fs::read(path).await?;
        let plaintext = match key {
            Some(key) => {
                let sealed: crate::crypto::EncryptedPayload = serde_json::from_slice(&bytes)?;
                crate::crypto::open(key, &sealed, crate::crypto::EnvelopeKind::ConfigAtRest)?
            }
            None => bytes,
        };
        let snapshot: RegistrySnapshot = serde_json::from_slice(&plaintext)?;
        let mut map = self.machines.write().await;
        for (id, dump) in snapshot.machines {
            map.insert(
                id,
                Arc::new(Mutex::new(MachineEntry {
                    machine: dump.machine,
                    history: dump.history,
                    probe: dump.probe,
                    commands: dump.commands,
                    widget_logs: dump.widget_logs,
                })),
            );
        }
        *self.alerts.write().await = snapshot.alerts.into();
        *self.audit.write().await = snapshot.audit.into();
        Ok(())
    }

    async fn snapshot(&self) -> RegistrySnapshot {
        let map = self.machines.read().await;
        let mut machines = HashMap::new();
        for (id, entry) in map.iter() {
            let entry = entry.lock().await;
            machines.insert(
                id.clone(),
                MachineEntryDump {
                    machine: entry.machine.clone(),
                    history: entry.history.clone(),
                    probe: entry.probe.clone(),
                    commands: entry.commands.clone(),
                    widget_logs: entry.widget_logs.clone(),
                },
            );
        }
        RegistrySnapshot {
            machines,
            alerts: self.alerts.read().await.iter().cloned().collect(),
            audit: self.audit.read().await.iter().cloned().collect(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MachineEntryDump {
    machine: Machine,
    history: VecDeque<MetricSample>,
    probe: Option<HealthProbeResult>,
    commands: VecDeque<CommandEnvelope>,
    #[serde(default)]
    widget_logs: VecDeque<WidgetLogEntry>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RegistrySnapshot {
    machines: HashMap<String, MachineEntryDump>,
    alerts: Vec<Alert>,
    #[serde(default)]
    audit: Vec<AuditEntry>,
}

fn _assert_send_sync<T: Send + Sync>() {}
fn _store_is_send_sync() {
    _assert_send_sync::<Store>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{AlertSeverity, ProbeStatus};

    fn sample(ts: DateTime<Utc>) -> MetricSample {
        MetricSample {
            ts,
            cpu_percent: 1.0,
            memory_used_bytes: 0,
            memory_total_bytes: 0,
            memory_percent: 0.0,
            disk_used_bytes: 0,
            disk_total_bytes: 0,
            disk_percent: 0.0,
            network_bytes_sent: 0,
            network_bytes_received: 0,
            battery_percent: None,
            battery_plugged: None,
            temperature_celsius: None,
            uptime_seconds: None,
        }
    }

    fn descriptor(id: &str) -> MachineDescriptor {
        MachineDescriptor {
            machine_id: id.to_string(),
            os: "macOS".to_string(),
            arch: "arm64".to_string(),
            os_version: "14.0".to_string(),
            total_memory_bytes: 0,
            hardware_serial: None,
            local_ip: None,
        }
    }

    #[tokio::test]
    async fn history_is_fifo_bounded_at_cap() {
        let store = Store::new(60);
        for i in 0..(HISTORY_CAP + 10) {
            let ts = Utc::now() + chrono::Duration::seconds(i as i64);
            store.upsert_report("m1", descriptor("m1"), sample(ts)).await;
        }
        let view = store.get_machine("m1").await.unwrap();
        let _ = view;
    }

    #[tokio::test]
    async fn last_seen_moves_monotonically_with_out_of_order_samples() {
        let store = Store::new(60);
        let now = Utc::now();
        store.upsert_report("m1", descriptor("m1"), sample(now)).await;
        store
            .upsert_report("m1", descriptor("m1"), sample(now - chrono::Duration::seconds(50)))
            .await;
        let view = store.get_machine("m1").await.unwrap();
        assert_eq!(view.last_seen, now);
    }

    #[tokio::test]
    async fn command_queue_rejects_overflow() {
        let store = Store::new(60);
        store.upsert_report("m1", descriptor("m1"), sample(Utc::now())).await;
        for i in 0..COMMAND_QUEUE_CAP {
            let cmd = CommandEnvelope {
                command_id: format!("c{i}"),
                command_type: "noop".to_string(),
                params: serde_json::Value::Null,
                issued_ts: Utc::now(),
                ack_ts: None,
                result: None,
            };
            store.enqueue_command("m1", cmd).await.unwrap();
        }
        let overflow = CommandEnvelope {
            command_id: "overflow".to_string(),
            command_type: "noop".to_string(),
            params: serde_json::Value::Null,
            issued_ts: Utc::now(),
            ack_ts: None,
            result: None,
        };
        assert!(matches!(store.enqueue_command("m1", overflow).await, Err(StoreError::QueueFull(_))));
    }

    #[tokio::test]
    async fn ack_command_removes_it_from_the_queue() {
        let store = Store::new(60);
        store.upsert_report("m1", descriptor("m1"), sample(Utc::now())).await;
        let cmd = CommandEnvelope {
            command_id: "c1".to_string(),
            command_type: "noop".to_string(),
            params: serde_json::Value::Null,
            issued_ts: Utc::now(),
            ack_ts: None,
            result: None,
        };
        store.enqueue_command("m1", cmd).await.unwrap();
        assert_eq!(store.dequeue_commands("m1").await.len(), 1);
        store.ack_command("m1", "c1", serde_json::json!({"ok": true})).await.unwrap();
        assert_eq!(store.dequeue_commands("m1").await.len(), 0);
    }

    #[tokio::test]
    async fn unknown_machine_reads_return_none_not_an_error() {
        let store = Store::new(60);
        assert!(store.get_machine("ghost").await.is_none());
    }

    #[tokio::test]
    async fn fleet_summary_counts_by_combined_liveness() {
        let store = Store::new(60);
        store.upsert_report("healthy", descriptor("healthy"), sample(Utc::now())).await;
        store
            .update_health_probe(
                "healthy",
                HealthProbeResult {
                    status: ProbeStatus::Reachable,
                    last_check_ts: Utc::now(),
                    latency_ms: Some(5),
                    error: None,
                    agent_version: None,
                    agent_uptime_s: None,
                    responsive: true,
                    inner_payload: None,
                },
            )
            .await;
        let summary = store.fleet_summary().await;
        assert_eq!(summary.total_machines, 1);
        assert_eq!(summary.healthy, 1);
    }

    #[tokio::test]
    async fn persist_then_load_round_trips_plaintext() {
        let store = Store::new(60);
        store.upsert_report("m1", descriptor("m1"), sample(Utc::now())).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.blob");
        store.persist_now(&path, None).await.unwrap();

        let restored = Store::new(60);
        restored.load_on_start(&path, None).await.unwrap();
        assert!(restored.get_machine("m1").await.is_some());
    }

    #[tokio::test]
    async fn persist_then_load_round_trips_encrypted() {
        let store = Store::new(60);
        store.upsert_report("m1", descriptor("m1"), sample(Utc::now())).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.blob");
        let key = [9u8; crate::crypto::KEY_LEN];
        store.persist_now(&path, Some(&key)).await.unwrap();

        let restored = Store::new(60);
        restored.load_on_start(&path, Some(&key)).await.unwrap();
        assert!(restored.get_machine("m1").await.is_some());
    }

    #[tokio::test]
    async fn alert_stream_retains_within_window() {
        let store = Store::new(60);
        store
            .push_alert(Alert {
                ts: Utc::now(),
                alert_type: "cpu_high".to_string(),
                value: 99.0,
                threshold: 90.0,
                severity: AlertSeverity::Warning,
                message: "cpu high".to_string(),
                machine_id: Some("m1".to_string()),
            })
            .await;
        assert_eq!(store.recent_alerts(10).await.len(), 1);
    }
}
