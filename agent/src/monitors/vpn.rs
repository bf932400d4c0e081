// File: agent/src/monitors/vpn.rs
//
// 30s cadence. Detects VPN interface presence/name, declares
// connected/disconnected, emits events on transition. Never logs credentials.
use super::framework::Monitor;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, serde::Serialize)]
pub struct VpnRecord {
    pub ts: DateTime<Utc>,
    pub connected: bool,
    pub interface_name: String,
}

impl MonitorRecord for VpnRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "connected", "interface_name"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![self.ts.to_rfc3339(), self.connected.to_string(), self.interface_name.clone()]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            connected: row.get(1)?.parse().ok()?,
            interface_name: row.get(2)?.clone(),
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VpnEventRecord {
    pub ts: DateTime<Utc>,
    pub transition: String,
    pub interface_name: String,
}

impl MonitorRecord for VpnEventRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "transition", "interface_name"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![self.ts.to_rfc3339(), self.transition.clone(), self.interface_name.clone()]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            transition: row.get(1)?.clone(),
            interface_name: row.get(2)?.clone(),
        })
    }
}

pub struct VpnMonitor<S: SampleSource<Record = VpnRecord>> {
    source: Arc<S>,
    last_connected: Mutex<Option<bool>>,
}

impl<S: SampleSource<Record = VpnRecord>> VpnMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            last_connected: Mutex::new(None),
        }
    }

    pub async fn take_event(&self, sample: &VpnRecord) -> Option<VpnEventRecord> {
        let mut last = self.last_connected.lock().await;
        let event = match *last {
            Some(prev) if prev != sample.connected => Some(VpnEventRecord {
                ts: sample.ts,
                transition: if sample.connected { "connected".into() } else { "disconnected".into() },
                interface_name: sample.interface_name.clone(),
            }),
            _ => None,
        };
        *last = Some(sample.connected);
        event
    }
}

#[async_trait]
impl<S: SampleSource<Record = VpnRecord>> Monitor for VpnMonitor<S> {
    type Record = VpnRecord;

    fn name(&self) -> &'static str {
        "vpn"
    }

    fn default_interval_seconds(&self) -> u64 {
        30
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<VpnRecord>> {
        self.source.sample().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::sample_source::FakeSampleSource;

    #[tokio::test]
    async fn transition_to_connected_emits_event() {
        let monitor = VpnMonitor::new(Arc::new(FakeSampleSource::<VpnRecord>::new(vec![])));
        let disconnected = VpnRecord {
            ts: Utc::now(),
            connected: false,
            interface_name: "utun0".into(),
        };
        assert!(monitor.take_event(&disconnected).await.is_none());
        let connected = VpnRecord {
            connected: true,
            ..disconnected
        };
        let event = monitor.take_event(&connected).await.unwrap();
        assert_eq!(event.transition, "connected");
    }
}
