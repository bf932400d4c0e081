// File: agent/src/monitors/disk.rs
//
// 300s cadence. SMART status plus capacity.
use super::framework::Monitor;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, serde::Serialize)]
pub struct DiskHealthRecord {
    pub ts: DateTime<Utc>,
    pub device: String,
    pub smart_status: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

impl MonitorRecord for DiskHealthRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "device", "smart_status", "capacity_bytes", "used_bytes"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.device.clone(),
            self.smart_status.clone(),
            self.capacity_bytes.to_string(),
            self.used_bytes.to_string(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            device: row.get(1)?.clone(),
            smart_status: row.get(2)?.clone(),
            capacity_bytes: row.get(3)?.parse().ok()?,
            used_bytes: row.get(4)?.parse().ok()?,
        })
    }
}

pub struct DiskHealthMonitor<S: SampleSource<Record = DiskHealthRecord>> {
    source: Arc<S>,
}

impl<S: SampleSource<Record = DiskHealthRecord>> DiskHealthMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: SampleSource<Record = DiskHealthRecord>> Monitor for DiskHealthMonitor<S> {
    type Record = DiskHealthRecord;

    fn name(&self) -> &'static str {
        "disk"
    }

    fn default_interval_seconds(&self) -> u64 {
        300
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<DiskHealthRecord>> {
        self.source.sample().await
    }
}
