// File: fleet-server/src/web/mod.rs
//
// Admin HTTP surface. Built the same way the reference workspace assembles
// its router (one `.route(...)` chain, `CorsLayer` + `TraceLayer`, a single
// `.with_state`), generalized to carry both API-key and session auth schemes.
pub mod handlers;

use crate::ingest;
use crate::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/fleet/report", post(ingest::report))
        .route("/api/fleet/widget-logs", post(ingest::widget_logs))
        .route("/api/fleet/speedtest", post(ingest::speedtest_report))
        .route("/api/fleet/commands/{machine_id}", get(ingest::poll_commands))
        .route("/api/fleet/commands/{machine_id}/ack", post(ingest::ack_command))
        .route("/api/fleet/machines", get(handlers::list_machines))
        .route("/api/fleet/machines/{machine_id}", get(handlers::machine_detail))
        .route("/api/fleet/machines/{machine_id}/action", post(handlers::dispatch_action))
        .route("/api/fleet/summary", get(handlers::fleet_summary))
        .route("/api/fleet/alerts", get(handlers::recent_alerts))
        .route("/api/fleet/audit", get(handlers::recent_audit))
        .route("/api/fleet/config", get(handlers::get_config).post(handlers::set_config))
        .route("/api/fleet/speedtest/summary", get(handlers::speedtest_summary))
        .route("/api/fleet/speedtest/comparison", get(handlers::speedtest_comparison))
        .route("/api/fleet/speedtest/machine", get(handlers::speedtest_machine))
        .route("/api/fleet/speedtest/anomalies", get(handlers::speedtest_anomalies))
        .route("/api/fleet/speedtest/recent", get(handlers::speedtest_recent))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
