// File: fleet-server/src/probe.rs
//
// Active health probing of known agents. Bounded-fan-out shape grounded on
// the reference workspace's `HealthMonitor::check_all_nodes` (per-node
// `tokio::spawn` behind a concurrency cap), adapted here with a `Semaphore`
// so a partial-failure storm never starves the probe loop or HTTP serving.
use crate::store::types::{HealthProbeResult, ProbeStatus};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ProbeScheduler {
    store: Arc<Store>,
    client: reqwest::Client,
    period: Duration,
    max_in_flight: usize,
}

impl ProbeScheduler {
    pub fn new(store: Arc<Store>, period: Duration, max_in_flight: usize) -> Self {
        Self {
            store,
            client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .expect("reqwest client builds with a fixed timeout"),
            period,
            max_in_flight,
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }

    async fn run_once(&self) {
        let machines = self.store.list_machines().await;
        let targets: Vec<(String, String)> = machines
            .into_iter()
            .filter_map(|m| m.info.local_ip.clone().map(|ip| (m.machine_id, ip)))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut handles = Vec::with_capacity(targets.len());
        for (machine_id, ip) in targets {
            let permit = Arc::clone(&semaphore);
            let client = self.client.clone();
            let store = Arc::clone(&self.store);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                let result = probe_one(&client, &ip).await;
                store.update_health_probe(&machine_id, result).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "probe task panicked");
            }
        }
    }
}

async fn probe_one(client: &reqwest::Client, ip: &str) -> HealthProbeResult {
    let url = format!("http://{ip}/api/agent/health");
    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(PROBE_TIMEOUT, client.get(&url).send()).await;
    let now = chrono::Utc::now();

    match outcome {
        Err(_) => HealthProbeResult {
            status: ProbeStatus::Timeout,
            last_check_ts: now,
            latency_ms: None,
            error: Some("probe timed out".to_string()),
            agent_version: None,
            agent_uptime_s: None,
            responsive: false,
            inner_payload: None,
        },
        Ok(Err(e)) => HealthProbeResult {
            status: ProbeStatus::Unreachable,
            last_check_ts: now,
            latency_ms: None,
            error: Some(e.to_string()),
            agent_version: None,
            agent_uptime_s: None,
            responsive: false,
            inner_payload: None,
        },
        Ok(Ok(response)) => {
            let latency_ms = started.elapsed().as_millis() as u64;
            if !response.status().is_success() {
                return HealthProbeResult {
                    status: ProbeStatus::Error,
                    last_check_ts: now,
                    latency_ms: Some(latency_ms),
                    error: Some(format!("http {}", response.status())),
                    agent_version: None,
                    agent_uptime_s: None,
                    responsive: false,
                    inner_payload: None,
                };
            }
            match response.json::<serde_json::Value>().await {
                Ok(body) => {
                    let responsive = body.get("responsive").and_then(|v| v.as_bool()).unwrap_or(true);
                    let status = if responsive { ProbeStatus::Reachable } else { ProbeStatus::Unhealthy };
                    HealthProbeResult {
                        status,
                        last_check_ts: now,
                        latency_ms: Some(latency_ms),
                        error: None,
                        agent_version: body.get("agent_version").and_then(|v| v.as_str()).map(str::to_string),
                        agent_uptime_s: body.get("uptime_s").and_then(|v| v.as_u64()),
                        responsive,
                        inner_payload: Some(body),
                    }
                }
                Err(e) => {
                    debug!(error = %e, "agent health payload did not parse");
                    HealthProbeResult {
                        status: ProbeStatus::Error,
                        last_check_ts: now,
                        latency_ms: Some(latency_ms),
                        error: Some(e.to_string()),
                        agent_version: None,
                        agent_uptime_s: None,
                        responsive: false,
                        inner_payload: None,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_one_classifies_unreachable_host_as_unreachable_or_timeout() {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build().unwrap();
        let result = probe_one(&client, "127.0.0.1:1").await;
        assert!(matches!(result.status, ProbeStatus::Unreachable | ProbeStatus::Timeout));
        assert!(!result.responsive);
    }

    #[tokio::test]
    async fn probe_one_classifies_reachable_healthy_agent() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/api/agent/health"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responsive": true,
                "agent_version": "0.1.0",
                "uptime_s": 42
            })))
            .mount(&server)
            .await;
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build().unwrap();
        let addr = server.uri().trim_start_matches("http://").to_string();
        let result = probe_one(&client, &addr).await;
        assert_eq!(result.status, ProbeStatus::Reachable);
        assert_eq!(result.agent_version.as_deref(), Some("0.1.0"));
    }

    #[tokio::test]
    async fn probe_scheduler_runs_once_without_known_ips() {
        let store = Arc::new(Store::new(60));
        let scheduler = Arc::new(ProbeScheduler::new(Arc::clone(&store), Duration::from_secs(60), 4));
        scheduler.run_once().await;
    }
}
