// File: agent/src/reporter.rs
//
// Loop that composes a metrics envelope from monitor state and pushes it to
// the Fleet Server. Built around one pooled reqwest::Client, the same
// single-client-per-component pattern the reference workspace's
// HealthMonitor uses, generalized from a check-all-nodes fan-out to a single
// periodic push.
use crate::crypto::{self, EnvelopeKind, KEY_LEN};
use crate::types::{MachineDescriptor, MetricSample, ReportBody, WidgetLogEvent};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct Reporter {
    client: reqwest::Client,
    fleet_server_url: String,
    api_key: String,
    encryption_key: Option<[u8; KEY_LEN]>,
    report_interval: Duration,
    halted: AtomicBool,
    last_report_ts: tokio::sync::Mutex<Option<chrono::DateTime<chrono::Utc>>>,
}

impl Reporter {
    pub fn new(fleet_server_url: String, api_key: String, encryption_key: Option<[u8; KEY_LEN]>, report_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
            fleet_server_url,
            api_key,
            encryption_key,
            report_interval,
            halted: AtomicBool::new(false),
            last_report_ts: tokio::sync::Mutex::new(None),
        })
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }

    pub async fn last_report_ts(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        *self.last_report_ts.lock().await
    }

    /// Spawns the report loop. Each tick supersedes the previous one; a
    /// failed send is simply dropped in favor of the next tick's fresh
    /// sample, which is the "last-writer-wins" retry policy in full.
    /// `sample_fn` is async since a real sample reads monitor state, which is
    /// itself behind async locks.
    pub fn spawn<F, Fut>(self: &Arc<Self>, mut sample_fn: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = (MachineDescriptor, MetricSample)> + Send,
    {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reporter.report_interval);
            loop {
                ticker.tick().await;
                if reporter.halted.load(Ordering::Relaxed) {
                    continue;
                }
                let (machine_info, metrics) = sample_fn().await;
                reporter.send_once(machine_info, metrics).await;
            }
        })
    }

    /// Forwards a widget-log batch collected by the agent's local HTTP
    /// surface on to the Fleet Server, under the same envelope policy as a
    /// report. Returns an error string (not halted/retried) since the caller
    /// is an HTTP handler that owns its own response to the widget.
    pub async fn forward_widget_logs(&self, machine_id: &str, events: Vec<WidgetLogEvent>) -> Result<(), String> {
        if events.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({
            "machine_id": machine_id,
            "events": events,
        });
        let json = serde_json::to_vec(&body).map_err(|e| e.to_string())?;
        let payload: serde_json::Value = if let Some(key) = &self.encryption_key {
            let sealed = crypto::seal(key, &json, EnvelopeKind::WidgetLog).map_err(|e| e.to_string())?;
            serde_json::to_value(sealed).map_err(|e| e.to_string())?
        } else {
            serde_json::from_slice(&json).map_err(|e| e.to_string())?
        };

        let url = format!("{}/api/fleet/widget-logs", self.fleet_server_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("widget-log batch rejected with status {}", resp.status()))
        }
    }

    /// Forwards one completed speed-test result to the fleet server's
    /// aggregator, under the same envelope policy as a report.
    pub async fn forward_speedtest(&self, machine_id: &str, record: &crate::monitors::speedtest::SpeedtestRecord) -> Result<(), String> {
        let body = serde_json::json!({
            "machine_id": machine_id,
            "ts": record.ts,
            "download_mbps": record.download_mbps,
            "upload_mbps": record.upload_mbps,
            "ping_ms": record.ping_ms,
            "jitter_ms": record.jitter_ms,
            "server_name": record.server_name,
            "isp": record.isp,
        });
        let json = serde_json::to_vec(&body).map_err(|e| e.to_string())?;
        let payload: serde_json::Value = if let Some(key) = &self.encryption_key {
            let sealed = crypto::seal(key, &json, EnvelopeKind::Speedtest).map_err(|e| e.to_string())?;
            serde_json::to_value(sealed).map_err(|e| e.to_string())?
        } else {
            serde_json::from_slice(&json).map_err(|e| e.to_string())?
        };

        let url = format!("{}/api/fleet/speedtest", self.fleet_server_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("speedtest result rejected with status {}", resp.status()))
        }
    }

    async fn send_once(&self, machine_info: MachineDescriptor, metrics: MetricSample) {
        let body = ReportBody {
            machine_id: machine_info.machine_id.clone(),
            machine_info,
            metrics,
        };

        let json = match serde_json::to_vec(&body) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "failed to serialize report body");
                return;
            }
        };

        let payload: serde_json::Value = if let Some(key) = &self.encryption_key {
            match crypto::seal(key, &json, EnvelopeKind::Report) {
                Ok(sealed) => serde_json::to_value(sealed).unwrap(),
                Err(e) => {
                    error!(error = %e, "failed to seal report payload");
                    return;
                }
            }
        } else {
            serde_json::from_slice(&json).unwrap()
        };

        let url = format!("{}/api/fleet/report", self.fleet_server_url.trim_end_matches('/'));
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(&url)
                .header("X-API-Key", &self.api_key)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    *self.last_report_ts.lock().await = Some(chrono::Utc::now());
                    debug!("report accepted");
                    return;
                }
                Ok(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
                    warn!(status = %resp.status(), "reporting halted: authentication rejected");
                    self.halted.store(true, Ordering::Relaxed);
                    return;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    debug!(status = %resp.status(), attempt, "transient server error, backing off");
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), "report rejected");
                    return;
                }
                Err(e) => {
                    debug!(error = %e, attempt, "transient network error, backing off");
                }
            }

            attempt += 1;
            let backoff = backoff_with_jitter(attempt, self.report_interval);
            if backoff >= self.report_interval {
                info!("giving up on this report; superseded by next tick");
                return;
            }
            tokio::time::sleep(backoff).await;
        }
    }
}

fn backoff_with_jitter(attempt: u32, cap: Duration) -> Duration {
    let base_ms = 200u64.saturating_mul(1u64 << attempt.min(10));
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 4 + 1);
    Duration::from_millis(base_ms + jitter_ms).min(cap)
}
