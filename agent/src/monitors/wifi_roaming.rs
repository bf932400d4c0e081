// File: agent/src/monitors/wifi_roaming.rs
//
// 30s cadence. Emits an event when BSSID changes while SSID stays constant,
// measuring roam latency, and flags a "sticky client" when RSSI stays at or
// below -75 dBm for 3+ cycles without roaming.
use super::framework::Monitor;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RoamEventRecord {
    pub ts: DateTime<Utc>,
    pub ssid: String,
    pub old_bssid: String,
    pub new_bssid: String,
    pub roam_latency_ms: f64,
    pub sticky_client: bool,
}

impl MonitorRecord for RoamEventRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "ssid", "old_bssid", "new_bssid", "roam_latency_ms", "sticky_client"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.ssid.clone(),
            self.old_bssid.clone(),
            self.new_bssid.clone(),
            self.roam_latency_ms.to_string(),
            self.sticky_client.to_string(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            ssid: row.get(1)?.clone(),
            old_bssid: row.get(2)?.clone(),
            new_bssid: row.get(3)?.clone(),
            roam_latency_ms: row.get(4)?.parse().ok()?,
            sticky_client: row.get(5)?.parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RoamSample {
    pub ts: DateTime<Utc>,
    pub ssid: String,
    pub bssid: String,
    pub rssi: i32,
    pub reachable: bool,
}

const STICKY_RSSI_THRESHOLD: i32 = -75;
const STICKY_STREAK: u32 = 3;

struct RoamState {
    ssid: String,
    bssid: String,
    weak_streak: u32,
    first_unreachable_since_bssid_change: Option<DateTime<Utc>>,
}

pub struct WifiRoamingMonitor<S: SampleSource<Record = RoamSample>> {
    source: Arc<S>,
    state: Mutex<Option<RoamState>>,
}

impl<S: SampleSource<Record = RoamSample>> WifiRoamingMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            state: Mutex::new(None),
        }
    }

    async fn observe(&self, sample: &RoamSample) -> Option<RoamEventRecord> {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            *guard = Some(RoamState {
                ssid: sample.ssid.clone(),
                bssid: sample.bssid.clone(),
                weak_streak: 0,
                first_unreachable_since_bssid_change: None,
            });
            return None;
        };

        let mut event = None;
        if state.ssid == sample.ssid && state.bssid != sample.bssid {
            let roam_latency_ms = state
                .first_unreachable_since_bssid_change
                .map(|since| (sample.ts - since).num_milliseconds() as f64)
                .unwrap_or(0.0);
            event = Some(RoamEventRecord {
                ts: sample.ts,
                ssid: sample.ssid.clone(),
                old_bssid: state.bssid.clone(),
                new_bssid: sample.bssid.clone(),
                roam_latency_ms,
                sticky_client: state.weak_streak >= STICKY_STREAK,
            });
            state.bssid = sample.bssid.clone();
            state.weak_streak = 0;
            state.first_unreachable_since_bssid_change = None;
        } else {
            state.ssid = sample.ssid.clone();
            if sample.rssi <= STICKY_RSSI_THRESHOLD {
                state.weak_streak += 1;
            } else {
                state.weak_streak = 0;
            }
            if !sample.reachable && state.first_unreachable_since_bssid_change.is_none() {
                state.first_unreachable_since_bssid_change = Some(sample.ts);
            }
        }
        event
    }
}

#[async_trait]
impl<S: SampleSource<Record = RoamSample>> Monitor for WifiRoamingMonitor<S> {
    type Record = RoamEventRecord;

    fn name(&self) -> &'static str {
        "wifi_roaming"
    }

    fn default_interval_seconds(&self) -> u64 {
        30
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<RoamEventRecord>> {
        let Some(sample) = self.source.sample().await? else {
            return Ok(None);
        };
        Ok(self.observe(&sample).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::sample_source::FakeSampleSource;

    fn sample(ssid: &str, bssid: &str, rssi: i32, reachable: bool) -> RoamSample {
        RoamSample {
            ts: Utc::now(),
            ssid: ssid.into(),
            bssid: bssid.into(),
            rssi,
            reachable,
        }
    }

    #[tokio::test]
    async fn bssid_change_with_same_ssid_emits_roam_event() {
        let source = Arc::new(FakeSampleSource::new(vec![
            Some(sample("Home", "aa:aa", -40, true)),
            Some(sample("Home", "bb:bb", -40, true)),
        ]));
        let monitor = WifiRoamingMonitor::new(source);
        assert!(monitor.run_cycle().await.unwrap().is_none());
        let event = monitor.run_cycle().await.unwrap().unwrap();
        assert_eq!(event.old_bssid, "aa:aa");
        assert_eq!(event.new_bssid, "bb:bb");
    }

    #[tokio::test]
    async fn sustained_weak_rssi_without_roam_flags_sticky_client() {
        let source = Arc::new(FakeSampleSource::new(vec![
            Some(sample("Home", "aa:aa", -80, true)),
            Some(sample("Home", "aa:aa", -80, true)),
            Some(sample("Home", "aa:aa", -80, true)),
            Some(sample("Home", "bb:bb", -40, true)),
        ]));
        let monitor = WifiRoamingMonitor::new(source);
        for _ in 0..3 {
            monitor.run_cycle().await.unwrap();
        }
        let event = monitor.run_cycle().await.unwrap().unwrap();
        assert!(event.sticky_client);
    }
}
