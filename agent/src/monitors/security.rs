// File: agent/src/monitors/security.rs
//
// 300s cadence. Firewall/FileVault/Gatekeeper/SIP/screen-lock/updates flags
// plus a 0-100 score; emits diff events on transitions.
use super::framework::Monitor;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SecurityPostureRecord {
    pub ts: DateTime<Utc>,
    pub firewall_enabled: bool,
    pub filevault_enabled: bool,
    pub gatekeeper_enabled: bool,
    pub sip_enabled: bool,
    pub screen_lock_enabled: bool,
    pub updates_current: bool,
    pub score: u32,
}

impl MonitorRecord for SecurityPostureRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "firewall_enabled", "filevault_enabled", "gatekeeper_enabled", "sip_enabled", "screen_lock_enabled", "updates_current", "score"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.firewall_enabled.to_string(),
            self.filevault_enabled.to_string(),
            self.gatekeeper_enabled.to_string(),
            self.sip_enabled.to_string(),
            self.screen_lock_enabled.to_string(),
            self.updates_current.to_string(),
            self.score.to_string(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            firewall_enabled: row.get(1)?.parse().ok()?,
            filevault_enabled: row.get(2)?.parse().ok()?,
            gatekeeper_enabled: row.get(3)?.parse().ok()?,
            sip_enabled: row.get(4)?.parse().ok()?,
            screen_lock_enabled: row.get(5)?.parse().ok()?,
            updates_current: row.get(6)?.parse().ok()?,
            score: row.get(7)?.parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SecurityEventRecord {
    pub ts: DateTime<Utc>,
    pub flag: String,
    pub now_enabled: bool,
}

impl MonitorRecord for SecurityEventRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "flag", "now_enabled"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![self.ts.to_rfc3339(), self.flag.clone(), self.now_enabled.to_string()]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            flag: row.get(1)?.clone(),
            now_enabled: row.get(2)?.parse().ok()?,
        })
    }
}

pub fn score(r: &SecurityPostureRecord) -> u32 {
    let flags = [
        r.firewall_enabled,
        r.filevault_enabled,
        r.gatekeeper_enabled,
        r.sip_enabled,
        r.screen_lock_enabled,
        r.updates_current,
    ];
    let enabled = flags.iter().filter(|f| **f).count();
    ((enabled as f64 / flags.len() as f64) * 100.0).round() as u32
}

pub struct SecurityMonitor<S: SampleSource<Record = SecurityPostureRecord>> {
    source: Arc<S>,
    last: Mutex<Option<SecurityPostureRecord>>,
}

impl<S: SampleSource<Record = SecurityPostureRecord>> SecurityMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            last: Mutex::new(None),
        }
    }

    pub async fn diff(&self, sample: &SecurityPostureRecord) -> Vec<SecurityEventRecord> {
        let mut last = self.last.lock().await;
        let mut events = Vec::new();
        if let Some(prev) = last.as_ref() {
            let pairs = [
                ("firewall", prev.firewall_enabled, sample.firewall_enabled),
                ("filevault", prev.filevault_enabled, sample.filevault_enabled),
                ("gatekeeper", prev.gatekeeper_enabled, sample.gatekeeper_enabled),
                ("sip", prev.sip_enabled, sample.sip_enabled),
                ("screen_lock", prev.screen_lock_enabled, sample.screen_lock_enabled),
                ("updates", prev.updates_current, sample.updates_current),
            ];
            for (flag, was, now) in pairs {
                if was != now {
                    events.push(SecurityEventRecord {
                        ts: sample.ts,
                        flag: flag.into(),
                        now_enabled: now,
                    });
                }
            }
        }
        *last = Some(sample.clone());
        events
    }
}

#[async_trait]
impl<S: SampleSource<Record = SecurityPostureRecord>> Monitor for SecurityMonitor<S> {
    type Record = SecurityPostureRecord;

    fn name(&self) -> &'static str {
        "security"
    }

    fn default_interval_seconds(&self) -> u64 {
        300
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<SecurityPostureRecord>> {
        let mut sample = self.source.sample().await?;
        if let Some(record) = sample.as_mut() {
            record.score = score(record);
            self.diff(record).await;
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_percentage_of_enabled_flags() {
        let r = SecurityPostureRecord {
            ts: Utc::now(),
            firewall_enabled: true,
            filevault_enabled: true,
            gatekeeper_enabled: true,
            sip_enabled: false,
            screen_lock_enabled: false,
            updates_current: false,
            score: 0,
        };
        assert_eq!(score(&r), 50);
    }
}
