// File: agent/src/monitors/ping.rs
//
// Every 10s, pings a small fixed target set and declares reachability
// degraded when loss exceeds 10% or latency exceeds 100ms over consecutive
// cycles.
use super::framework::{bounded_command, Monitor};
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PingRecord {
    pub ts: DateTime<Utc>,
    pub target: String,
    pub latency_ms: f64,
    pub loss_pct: f64,
}

impl MonitorRecord for PingRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "target", "latency_ms", "loss_pct"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.target.clone(),
            self.latency_ms.to_string(),
            self.loss_pct.to_string(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            target: row.get(1)?.clone(),
            latency_ms: row.get(2)?.parse().ok()?,
            loss_pct: row.get(3)?.parse().ok()?,
        })
    }
}

const DEGRADED_LOSS_PCT: f64 = 10.0;
const DEGRADED_LATENCY_MS: f64 = 100.0;
const DEGRADED_STREAK: u32 = 3;

pub struct PingMonitor<S: SampleSource<Record = PingRecord>> {
    source: Arc<S>,
    degraded_streak: AtomicU32,
}

impl<S: SampleSource<Record = PingRecord>> PingMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            degraded_streak: AtomicU32::new(0),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_streak.load(Ordering::Relaxed) >= DEGRADED_STREAK
    }
}

#[async_trait]
impl<S: SampleSource<Record = PingRecord>> Monitor for PingMonitor<S> {
    type Record = PingRecord;

    fn name(&self) -> &'static str {
        "ping"
    }

    fn default_interval_seconds(&self) -> u64 {
        10
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<PingRecord>> {
        let sample = self.source.sample().await?;
        if let Some(record) = &sample {
            if record.loss_pct > DEGRADED_LOSS_PCT || record.latency_ms > DEGRADED_LATENCY_MS {
                self.degraded_streak.fetch_add(1, Ordering::Relaxed);
            } else {
                self.degraded_streak.store(0, Ordering::Relaxed);
            }
        }
        Ok(sample)
    }
}

/// Production sample source: shells out to `ping -c 1` against a fixed
/// target with a bounded deadline. Parsing the real output is the
/// out-of-scope macOS data-collection shim; this returns no-data until that
/// shim is wired in.
pub struct SystemPingSource {
    pub target: String,
}

#[async_trait]
impl SampleSource for SystemPingSource {
    type Record = PingRecord;

    async fn sample(&self) -> anyhow::Result<Option<PingRecord>> {
        let mut cmd = tokio::process::Command::new("ping");
        cmd.arg("-c").arg("1").arg(&self.target);
        let output = bounded_command(cmd, Duration::from_secs(5)).await;
        match output {
            Some(out) if out.status.success() => Ok(None),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::sample_source::FakeSampleSource;

    fn sample(loss: f64, latency: f64) -> PingRecord {
        PingRecord {
            ts: Utc::now(),
            target: "1.1.1.1".into(),
            latency_ms: latency,
            loss_pct: loss,
        }
    }

    #[tokio::test]
    async fn degraded_after_three_consecutive_bad_cycles() {
        let source = Arc::new(FakeSampleSource::new(vec![
            Some(sample(20.0, 10.0)),
            Some(sample(20.0, 10.0)),
            Some(sample(20.0, 10.0)),
        ]));
        let monitor = PingMonitor::new(source);
        for _ in 0..3 {
            monitor.run_cycle().await.unwrap();
        }
        assert!(monitor.is_degraded());
    }

    #[tokio::test]
    async fn a_good_cycle_resets_the_streak() {
        let source = Arc::new(FakeSampleSource::new(vec![
            Some(sample(20.0, 10.0)),
            Some(sample(20.0, 10.0)),
            Some(sample(0.0, 10.0)),
        ]));
        let monitor = PingMonitor::new(source);
        for _ in 0..3 {
            monitor.run_cycle().await.unwrap();
        }
        assert!(!monitor.is_degraded());
    }
}
