// File: agent/src/monitors/wifi.rs
//
// 60s cadence. Produces RSSI/SNR/channel/tx-rate and a computed 0-100
// quality_score; emits an event record on SSID or BSSID change.
use super::framework::Monitor;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, serde::Serialize)]
pub struct WifiRecord {
    pub ts: DateTime<Utc>,
    pub ssid: String,
    pub bssid: String,
    pub rssi: i32,
    pub noise: i32,
    pub snr: i32,
    pub channel: u32,
    pub tx_rate: f64,
    pub quality_score: f64,
}

impl MonitorRecord for WifiRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "ssid", "bssid", "rssi", "noise", "snr", "channel", "tx_rate", "quality_score"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.ssid.clone(),
            self.bssid.clone(),
            self.rssi.to_string(),
            self.noise.to_string(),
            self.snr.to_string(),
            self.channel.to_string(),
            self.tx_rate.to_string(),
            self.quality_score.to_string(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            ssid: row.get(1)?.clone(),
            bssid: row.get(2)?.clone(),
            rssi: row.get(3)?.parse().ok()?,
            noise: row.get(4)?.parse().ok()?,
            snr: row.get(5)?.parse().ok()?,
            channel: row.get(6)?.parse().ok()?,
            tx_rate: row.get(7)?.parse().ok()?,
            quality_score: row.get(8)?.parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WifiEventRecord {
    pub ts: DateTime<Utc>,
    pub kind: String,
    pub old_ssid: String,
    pub new_ssid: String,
    pub old_bssid: String,
    pub new_bssid: String,
}

impl MonitorRecord for WifiEventRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "kind", "old_ssid", "new_ssid", "old_bssid", "new_bssid"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.kind.clone(),
            self.old_ssid.clone(),
            self.new_ssid.clone(),
            self.old_bssid.clone(),
            self.new_bssid.clone(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            kind: row.get(1)?.clone(),
            old_ssid: row.get(2)?.clone(),
            new_ssid: row.get(3)?.clone(),
            old_bssid: row.get(4)?.clone(),
            new_bssid: row.get(5)?.clone(),
        })
    }
}

/// 0-100 from RSSI and SNR; higher is better. RSSI above -50 dBm and SNR
/// above 40 dB saturate the score at 100; below -90 dBm or 0 dB SNR floors it.
pub fn quality_score(rssi: i32, snr: i32) -> f64 {
    let rssi_score = ((rssi + 90) as f64 / 40.0).clamp(0.0, 1.0);
    let snr_score = (snr as f64 / 40.0).clamp(0.0, 1.0);
    ((rssi_score * 0.6 + snr_score * 0.4) * 100.0).round()
}

pub struct WifiMonitor<S: SampleSource<Record = WifiRecord>> {
    source: Arc<S>,
    last_association: Mutex<Option<(String, String)>>,
}

impl<S: SampleSource<Record = WifiRecord>> WifiMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            last_association: Mutex::new(None),
        }
    }

    pub async fn take_event(&self, sample: &WifiRecord) -> Option<WifiEventRecord> {
        let mut last = self.last_association.lock().await;
        let event = match last.as_ref() {
            Some((ssid, bssid)) if ssid != &sample.ssid || bssid != &sample.bssid => Some(WifiEventRecord {
                ts: sample.ts,
                kind: if ssid != &sample.ssid { "ssid_change".into() } else { "bssid_change".into() },
                old_ssid: ssid.clone(),
                new_ssid: sample.ssid.clone(),
                old_bssid: bssid.clone(),
                new_bssid: sample.bssid.clone(),
            }),
            _ => None,
        };
        *last = Some((sample.ssid.clone(), sample.bssid.clone()));
        event
    }
}

#[async_trait]
impl<S: SampleSource<Record = WifiRecord>> Monitor for WifiMonitor<S> {
    type Record = WifiRecord;

    fn name(&self) -> &'static str {
        "wifi"
    }

    fn default_interval_seconds(&self) -> u64 {
        60
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<WifiRecord>> {
        let mut sample = self.source.sample().await?;
        if let Some(record) = sample.as_mut() {
            record.quality_score = quality_score(record.rssi, record.snr);
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_score_saturates_at_strong_signal() {
        assert_eq!(quality_score(-40, 45), 100.0);
    }

    #[test]
    fn quality_score_floors_at_weak_signal() {
        assert_eq!(quality_score(-95, 0), 0.0);
    }

    #[tokio::test]
    async fn ssid_change_emits_event() {
        let monitor = WifiMonitor::new(Arc::new(crate::monitors::sample_source::FakeSampleSource::<WifiRecord>::new(vec![])));
        let first = WifiRecord {
            ts: Utc::now(),
            ssid: "Home".into(),
            bssid: "aa:aa".into(),
            rssi: -50,
            noise: -90,
            snr: 40,
            channel: 6,
            tx_rate: 400.0,
            quality_score: 0.0,
        };
        assert!(monitor.take_event(&first).await.is_none());
        let mut second = first.clone();
        second.ssid = "Office".into();
        let event = monitor.take_event(&second).await.unwrap();
        assert_eq!(event.kind, "ssid_change");
    }
}
