// File: agent/src/monitors/power.rs
//
// 120s cadence. Battery health %, cycle count, capacities, thermal pressure,
// throttle event count over 24h. Holds a ProbeGate per the hard platform-probe
// rate limit for system_profiler SPPowerDataType plus its own >=10min cache.
use super::framework::Monitor;
use super::rate_limit::{ProbeGate, TtlCache};
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PowerRecord {
    pub ts: DateTime<Utc>,
    pub battery_health_pct: f64,
    pub cycle_count: u32,
    pub design_capacity_mah: u32,
    pub current_capacity_mah: u32,
    pub thermal_pressure: String,
    pub throttle_events_24h: u32,
}

impl MonitorRecord for PowerRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "battery_health_pct", "cycle_count", "design_capacity_mah", "current_capacity_mah", "thermal_pressure", "throttle_events_24h"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.battery_health_pct.to_string(),
            self.cycle_count.to_string(),
            self.design_capacity_mah.to_string(),
            self.current_capacity_mah.to_string(),
            self.thermal_pressure.clone(),
            self.throttle_events_24h.to_string(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            battery_health_pct: row.get(1)?.parse().ok()?,
            cycle_count: row.get(2)?.parse().ok()?,
            design_capacity_mah: row.get(3)?.parse().ok()?,
            current_capacity_mah: row.get(4)?.parse().ok()?,
            thermal_pressure: row.get(5)?.clone(),
            throttle_events_24h: row.get(6)?.parse().ok()?,
        })
    }
}

pub struct PowerMonitor<S: SampleSource<Record = PowerRecord>> {
    source: Arc<S>,
    gate: ProbeGate,
    cache: TtlCache<PowerRecord>,
}

impl<S: SampleSource<Record = PowerRecord>> PowerMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            gate: ProbeGate::new(Duration::from_secs(120)),
            cache: TtlCache::new(Duration::from_secs(600)),
        }
    }
}

#[async_trait]
impl<S: SampleSource<Record = PowerRecord>> Monitor for PowerMonitor<S> {
    type Record = PowerRecord;

    fn name(&self) -> &'static str {
        "power"
    }

    fn default_interval_seconds(&self) -> u64 {
        120
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<PowerRecord>> {
        if let Some(cached) = self.cache.get().await {
            return Ok(Some(cached));
        }
        if !self.gate.try_acquire().await {
            return Ok(None);
        }
        let sample = self.source.sample().await?;
        if let Some(record) = &sample {
            self.cache.set(record.clone()).await;
        }
        Ok(sample)
    }
}
