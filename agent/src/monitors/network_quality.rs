// File: agent/src/monitors/network_quality.rs
//
// 60s cadence. TCP retransmit rate, DNS query latency against multiple
// resolvers, TLS handshake time, HTTP response time.
use super::framework::Monitor;
use super::sample_source::SampleSource;
use crate::csv_store::MonitorRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, serde::Serialize)]
pub struct NetworkQualityRecord {
    pub ts: DateTime<Utc>,
    pub tcp_retransmit_rate: f64,
    pub dns_latency_ms: f64,
    pub tls_handshake_ms: f64,
    pub http_response_ms: f64,
}

impl MonitorRecord for NetworkQualityRecord {
    fn field_names() -> &'static [&'static str] {
        &["ts", "tcp_retransmit_rate", "dns_latency_ms", "tls_handshake_ms", "http_response_ms"]
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn to_row(&self) -> Vec<String> {
        vec![
            self.ts.to_rfc3339(),
            self.tcp_retransmit_rate.to_string(),
            self.dns_latency_ms.to_string(),
            self.tls_handshake_ms.to_string(),
            self.http_response_ms.to_string(),
        ]
    }
    fn from_row(row: &[String]) -> Option<Self> {
        Some(Self {
            ts: DateTime::parse_from_rfc3339(row.first()?).ok()?.with_timezone(&Utc),
            tcp_retransmit_rate: row.get(1)?.parse().ok()?,
            dns_latency_ms: row.get(2)?.parse().ok()?,
            tls_handshake_ms: row.get(3)?.parse().ok()?,
            http_response_ms: row.get(4)?.parse().ok()?,
        })
    }
}

pub struct NetworkQualityMonitor<S: SampleSource<Record = NetworkQualityRecord>> {
    source: Arc<S>,
}

impl<S: SampleSource<Record = NetworkQualityRecord>> NetworkQualityMonitor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: SampleSource<Record = NetworkQualityRecord>> Monitor for NetworkQualityMonitor<S> {
    type Record = NetworkQualityRecord;

    fn name(&self) -> &'static str {
        "network_quality"
    }

    fn default_interval_seconds(&self) -> u64 {
        60
    }

    async fn run_cycle(&self) -> anyhow::Result<Option<NetworkQualityRecord>> {
        self.source.sample().await
    }
}
