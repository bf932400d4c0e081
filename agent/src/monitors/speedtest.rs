// File: agent/src/monitors/speedtest.rs
//
// 60s nominal cadence; skipped opportunistically under active user network
// load. Feeds the fleet server's speed-test aggregator.
use super::framework::Monitor;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpeedtestRecord {
    pub ts: DateTime<Utc>,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub server_name: String,
    pub isp: String,
}

impl MonitorRecord for SpeedtestRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "download_mbps", "upload_mbps", "ping_ms", "jitter_ms", "server_name", "isp"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.download_mbps.to_string(),
            self.upload_mbps.to_string(),
            self.ping_ms.to_string(),
            self.jitter_ms.to_string(),
            self.server_name.clone(),
            self.isp.clone(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            download_mbps: row.get(1)?.parse().ok()?,
            upload_mbps: row.get(2)?.parse().ok()?,
            ping_ms: row.get(3)?.parse().ok()?,
            jitter_ms: row.get(4)?.parse().ok()?,
            server_name: row.get(5)?.clone(),
            isp: row.get(6)?.clone(),
        })
    }
}

pub struct SpeedtestMonitor<S: SampleSource<Record = SpeedtestRecord>> {
    source: Arc<S>,
    active_load_detected: AtomicBool,
}

impl<S: SampleSource<Record = SpeedtestRecord>> SpeedtestMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            active_load_detected: AtomicBool::new(false),
        }
    }

    /// Called by the network-quality monitor or the reporter when it detects
    /// heavy outbound traffic; the next cycle is skipped opportunistically.
    pub fn mark_active_load(&self) {
        self.active_load_detected.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl<S: SampleSource<Record = SpeedtestRecord>> Monitor for SpeedtestMonitor<S> {
    type Record = SpeedtestRecord;

    fn name(&self) -> &'static str {
        "speedtest"
    }

    fn default_interval_seconds(&self) -> u64 {
        60
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<SpeedtestRecord>> {
        if self.active_load_detected.swap(false, Ordering::Relaxed) {
            return Ok(None);
        }
        self.source.sample().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::sample_source::FakeSampleSource;

    fn sample() -> SpeedtestRecord {
        SpeedtestRecord {
            ts: Utc::now(),
            download_mbps: 200.0,
            upload_mbps: 20.0,
            ping_ms: 8.0,
            jitter_ms: 1.2,
            server_name: "nyc1".into(),
            isp: "Acme".into(),
        }
    }

    #[tokio::test]
    async fn skips_cycle_when_active_load_flagged() {
        let monitor = SpeedtestMonitor::new(Arc::new(FakeSampleSource::new(vec![Some(sample())])));
        monitor.mark_active_load();
        assert!(monitor.run_cycle().await.unwrap().is_none());
    }
}
