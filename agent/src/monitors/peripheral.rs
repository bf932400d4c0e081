// File: agent/src/monitors/peripheral.rs
//
// 300s cadence. Emits an inventory snapshot for USB/Bluetooth/Thunderbolt
// plus diff events on connect/disconnect. Holds a ProbeGate per the hard
// platform-probe rate limit for system_profiler SPUSB|SPBluetooth|SPThunderbolt.
use super::framework::Monitor;
use super::rate_limit::ProbeGate;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PeripheralSnapshotRecord {
    pub ts: DateTime<Utc>,
    pub device_id: String,
    pub device_name: String,
    pub bus: String,
}

impl MonitorRecord for PeripheralSnapshotRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "device_id", "device_name", "bus"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![self.ts.to_rfc3339(), self.device_id.clone(), self.device_name.clone(), self.bus.clone()]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            device_id: row.get(1)?.clone(),
            device_name: row.get(2)?.clone(),
            bus: row.get(3)?.clone(),
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PeripheralEventRecord {
    pub ts: DateTime<Utc>,
    pub device_id: String,
    pub transition: String,
}

impl MonitorRecord for PeripheralEventRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "device_id", "transition"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![self.ts.to_rfc3339(), self.device_id.clone(), self.transition.clone()]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            device_id: row.get(1)?.clone(),
            transition: row.get(2)?.clone(),
        })
    }
}

pub struct PeripheralMonitor<S: SampleSource<Record = Vec<PeripheralSnapshotRecord>>> {
    source: Arc<S>,
    gate: ProbeGate,
    known: Mutex<BTreeSet<String>>,
}

impl<S: SampleSource<Record = Vec<PeripheralSnapshotRecord>>> PeripheralMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            gate: ProbeGate::new(Duration::from_secs(300)),
            known: Mutex::new(BTreeSet::new()),
        }
    }

    pub async fn diff(&self, snapshot: &[PeripheralSnapshotRecord]) -> Vec<PeripheralEventRecord> {
        let mut known = self.known.lock().await;
        let now_ids: BTreeSet<String> = snapshot.iter().map(|d| d.device_id.clone()).collect();
        let mut events = Vec::new();
        for id in now_ids.difference(&known) {
            events.push(PeripheralEventRecord {
                ts: Utc::now(),
                device_id: id.clone(),
                transition: "connected".into(),
            });
        }
        for id in known.difference(&now_ids) {
            events.push(PeripheralEventRecord {
                ts: Utc::now(),
                device_id: id.clone(),
                transition: "disconnected".into(),
            });
        }
        *known = now_ids;
        events
    }
}

#[async_trait]
impl<S: SampleSource<Record = Vec<PeripheralSnapshotRecord>>> Monitor for PeripheralMonitor<S> {
    type Record = PeripheralSnapshotRecord;

    fn name(&self) -> &'static str {
        "peripheral"
    }

    fn default_interval_seconds(&self) -> u64 {
        300
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<PeripheralSnapshotRecord>> {
        if !self.gate.try_acquire().await {
            return Ok(None);
        }
        let snapshot = self.source.sample().await?.unwrap_or_default();
        self.diff(&snapshot).await;
        Ok(snapshot.into_iter().next())
    }
}
