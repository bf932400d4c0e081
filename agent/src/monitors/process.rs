// File: agent/src/monitors/process.rs
//
// 5s cadence. Top-N by CPU and by memory; flags zombies and stuck processes
// (>95% CPU for 3 consecutive samples with no progress).
use super::framework::Monitor;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessSnapshotRecord {
    pub ts: DateTime<Utc>,
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub is_zombie: bool,
}

impl MonitorRecord for ProcessSnapshotRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "pid", "name", "cpu_percent", "memory_bytes", "is_zombie"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.pid.to_string(),
            self.name.clone(),
            self.cpu_percent.to_string(),
            self.memory_bytes.to_string(),
            self.is_zombie.to_string(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            pid: row.get(1)?.parse().ok()?,
            name: row.get(2)?.clone(),
            cpu_percent: row.get(3)?.parse().ok()?,
            memory_bytes: row.get(4)?.parse().ok()?,
            is_zombie: row.get(5)?.parse().ok()?,
        })
    }
}

const STUCK_CPU_THRESHOLD: f64 = 95.0;
const STUCK_STREAK: u32 = 3;

pub struct ProcessMonitor<S: SampleSource<Record = Vec<ProcessSnapshotRecord>>> {
    source: Arc<S>,
    high_cpu_streaks: Mutex<HashMap<u32, u32>>,
}

impl<S: SampleSource<Record = Vec<ProcessSnapshotRecord>>> ProcessMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            high_cpu_streaks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn stuck_pids(&self, snapshot: &[ProcessSnapshotRecord]) -> Vec<u32> {
        let mut streaks = self.high_cpu_streaks.lock().await;
        let seen: std::collections::HashSet<u32> = snapshot.iter().map(|p| p.pid).collect();
        streaks.retain(|pid, _| seen.contains(pid));

        let mut stuck = Vec::new();
        for p in snapshot {
            let streak = streaks.entry(p.pid).or_insert(0);
            if p.cpu_percent >= STUCK_CPU_THRESHOLD {
                *streak += 1;
            } else {
                *streak = 0;
            }
            if *streak >= STUCK_STREAK {
                stuck.push(p.pid);
            }
        }
        stuck
    }

    pub fn top_by_cpu(snapshot: &[ProcessSnapshotRecord], n: usize) -> Vec<ProcessSnapshotRecord> {
        let mut sorted = snapshot.to_vec();
        sorted.sort_by(|a, b| b.cpu_percent.partial_cmp(&a.cpu_percent).unwrap());
        sorted.truncate(n);
        sorted
    }

    pub fn top_by_memory(snapshot: &[ProcessSnapshotRecord], n: usize) -> Vec<ProcessSnapshotRecord> {
        let mut sorted = snapshot.to_vec();
        sorted.sort_by(|a, b| b.memory_bytes.cmp(&a.memory_bytes));
        sorted.truncate(n);
        sorted
    }
}

#[async_trait]
impl<S: SampleSource<Record = Vec<ProcessSnapshotRecord>>> Monitor for ProcessMonitor<S> {
    type Record = ProcessSnapshotRecord;

    fn name(&self) -> &'static str {
        "process"
    }

    fn default_interval_seconds(&self) -> u64 {
        5
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<ProcessSnapshotRecord>> {
        let snapshot = self.source.sample().await?.unwrap_or_default();
        self.stuck_pids(&snapshot).await;
        Ok(Self::top_by_cpu(&snapshot, 1).into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::sample_source::FakeSampleSource;

    fn proc(pid: u32, cpu: f64) -> ProcessSnapshotRecord {
        ProcessSnapshotRecord {
            ts: Utc::now(),
            pid,
            name: "x".into(),
            cpu_percent: cpu,
            memory_bytes: 0,
            is_zombie: false,
        }
    }

    #[tokio::test]
    async fn flags_process_stuck_for_three_consecutive_samples() {
        let monitor = ProcessMonitor::new(Arc::new(FakeSampleSource::<Vec<ProcessSnapshotRecord>>::new(vec![])));
        for _ in 0..2 {
            let stuck = monitor.stuck_pids(&[proc(1, 99.0)]).await;
            assert!(stuck.is_empty());
        }
        let stuck = monitor.stuck_pids(&[proc(1, 99.0)]).await;
        assert_eq!(stuck, vec![1]);
    }
}
