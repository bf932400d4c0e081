// File: agent/src/http.rs
//
// Agent-local HTTP surface. Built the way the reference workspace's
// web::server::create_router is built: one route chain, CORS + trace layers,
// a typed AppState. Handlers never hold a monitor's internal lock across I/O
// -- they only ever read last_result() snapshots.
use crate::jobs::JobManager;
use crate::monitors::Registry;
use crate::reporter::Reporter;
use crate::types::{AgentHealth, AgentHealthSystem, MonitorActionAccepted, MonitorActionRequest, WidgetLogEvent};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub jobs: Arc<JobManager>,
    pub reporter: Arc<Reporter>,
    pub started_at: Instant,
    pub hostname: String,
    pub agent_version: String,
    pub fleet_server_url: String,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/agent/health", get(health))
        .route("/api/ping/status", get(ping_status))
        .route("/api/ping/history", get(ping_history))
        .route("/api/speedtest/status", get(speedtest_status))
        .route("/api/speedtest/run", post(speedtest_run))
        .route("/api/widget-logs", post(widget_logs))
        .route("/api/:monitor/status", get(monitor_status))
        .route("/api/:monitor/history", get(monitor_history))
        .route("/api/:monitor/export", get(monitor_export))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// No auth; cheap; never blocks on a monitor cycle -- only reads cached
/// last_result() snapshots and process-wide counters.
async fn health(State(state): State<Arc<AppState>>) -> Json<AgentHealth> {
    let monitors = state.registry.status_map().await;
    let uptime_s = state.started_at.elapsed().as_secs();
    let snapshot = state.registry.system_snapshot().await;
    Json(AgentHealth {
        status: "healthy".to_string(),
        agent_version: state.agent_version.clone(),
        uptime_s,
        hostname: state.hostname.clone(),
        timestamp: Utc::now(),
        fleet_server_url: state.fleet_server_url.clone(),
        last_fleet_report_ts: state.reporter.last_report_ts().await,
        monitors,
        system: AgentHealthSystem {
            cpu_percent: snapshot.cpu_percent,
            mem_percent: snapshot.memory_percent,
            mem_avail_gb: 0.0,
        },
        responsive: true,
    })
}

async fn ping_status(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.ping.last_result().await {
        Some(record) => Json(serde_json::json!({
            "target": record.target,
            "latency_ms": record.latency_ms,
            "loss_pct": record.loss_pct,
        }))
        .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn ping_history(State(state): State<Arc<AppState>>) -> Json<Vec<serde_json::Value>> {
    let tail = state.registry.ping.csv_tail().await;
    Json(tail.iter().map(|r| serde_json::to_value(r).unwrap_or(serde_json::Value::Null)).collect())
}

async fn speedtest_status(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.speedtest.last_result().await {
        Some(record) => Json(record_to_json(&record)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn record_to_json(r: &crate::monitors::speedtest::SpeedtestRecord) -> serde_json::Value {
    serde_json::json!({
        "ts": r.ts,
        "download_mbps": r.download_mbps,
        "upload_mbps": r.upload_mbps,
        "ping_ms": r.ping_ms,
        "jitter_ms": r.jitter_ms,
        "server_name": r.server_name,
        "isp": r.isp,
    })
}

/// Long operations dispatch to a worker and return 202 with a polling action
/// id; idempotency_key dedupes retries.
async fn speedtest_run(State(state): State<Arc<AppState>>, Json(req): Json<MonitorActionRequest>) -> (StatusCode, Json<MonitorActionAccepted>) {
    let (job_id, created) = state.jobs.dispatch("speedtest", &req.idempotency_key).await;
    if created {
        let jobs = Arc::clone(&state.jobs);
        let job_id_clone = job_id.clone();
        let registry = Arc::clone(&state.registry);
        let reporter = Arc::clone(&state.reporter);
        let hostname = state.hostname.clone();
        tokio::spawn(async move {
            if let Some(record) = registry.speedtest.last_result().await {
                if let Err(e) = reporter.forward_speedtest(&hostname, &record).await {
                    tracing::warn!(error = %e, "failed to forward speedtest result to fleet server");
                }
            }
            jobs.complete(&job_id_clone, serde_json::json!({"queued": true})).await;
        });
    }
    (StatusCode::ACCEPTED, Json(MonitorActionAccepted { action_id: job_id }))
}

async fn widget_logs(State(state): State<Arc<AppState>>, Json(events): Json<Vec<WidgetLogEvent>>) -> StatusCode {
    match state.reporter.forward_widget_logs(&state.hostname, events).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            tracing::warn!(error = %e, "failed to forward widget-log batch to fleet server");
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Last cached result for any monitor, addressed by its `name()`.
async fn monitor_status(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match last_result_json(&state.registry, &name).await {
        Some(Some(v)) => Json(v).into_response(),
        Some(None) => StatusCode::NO_CONTENT.into_response(),
        None => (StatusCode::BAD_REQUEST, format!("unknown monitor: {name}")).into_response(),
    }
}

/// In-memory CSV tail for any monitor, addressed by its `name()`.
async fn monitor_history(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match csv_tail_json(&state.registry, &name).await {
        Some(rows) => Json(rows).into_response(),
        None => (StatusCode::BAD_REQUEST, format!("unknown monitor: {name}")).into_response(),
    }
}

/// Same data as `history`, offered under a distinct path for callers that
/// treat "export" as a bulk-download verb rather than a live status read.
async fn monitor_export(state: State<Arc<AppState>>, path: Path<String>) -> Response {
    monitor_history(state, path).await
}

async fn last_result_json(registry: &Registry, name: &str) -> Option<Option<serde_json::Value>> {
    macro_rules! arm {
        ($worker:expr) => {
            Some($worker.last_result().await.map(|r| serde_json::to_value(&r).unwrap_or(serde_json::Value::Null)))
        };
    }
    match name {
        "ping" => arm!(registry.ping),
        "wifi" => arm!(registry.wifi),
        "wifi_roaming" => arm!(registry.wifi_roaming),
        "speedtest" => arm!(registry.speedtest),
        "vpn" => arm!(registry.vpn),
        "saas" => arm!(registry.saas),
        "network_quality" => arm!(registry.network_quality),
        "peripheral" => arm!(registry.peripheral),
        "power" => arm!(registry.power),
        "security" => arm!(registry.security),
        "disk" => arm!(registry.disk),
        "process" => arm!(registry.process),
        _ => None,
    }
}

async fn csv_tail_json(registry: &Registry, name: &str) -> Option<Vec<serde_json::Value>> {
    macro_rules! arm {
        ($worker:expr) => {
            Some($worker.csv_tail().await.iter().map(|r| serde_json::to_value(r).unwrap_or(serde_json::Value::Null)).collect())
        };
    }
    match name {
        "ping" => arm!(registry.ping),
        "wifi" => arm!(registry.wifi),
        "wifi_roaming" => arm!(registry.wifi_roaming),
        "speedtest" => arm!(registry.speedtest),
        "vpn" => arm!(registry.vpn),
        "saas" => arm!(registry.saas),
        "network_quality" => arm!(registry.network_quality),
        "peripheral" => arm!(registry.peripheral),
        "power" => arm!(registry.power),
        "security" => arm!(registry.security),
        "disk" => arm!(registry.disk),
        "process" => arm!(registry.process),
        _ => None,
    }
}
