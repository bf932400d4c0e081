// File: fleet-server/src/ingest.rs
//
// Agent-facing surface: report intake, widget-log intake, command polling.
// Overload shedding guards the path the way the reference workspace's health
// checker bounds its own fan-out, adapted here to the inbound direction.
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::ApiKeyAuth;
use crate::crypto::{self, EnvelopeKind};
use crate::errors::FleetError;
use crate::speedtest::SpeedtestResult;
use crate::store::types::{CommandEnvelope, MachineDescriptor, MetricSample};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReportEnvelope {
    Sealed(crypto::EncryptedPayload),
    Plain(ReportBody),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportBody {
    pub machine_id: String,
    pub machine_info: MachineDescriptor,
    pub metrics: MetricSample,
}

#[derive(Debug, Serialize)]
pub struct ReportAck {
    pub accepted: bool,
}

async fn open_if_sealed<T: serde::de::DeserializeOwned>(
    state: &AppState,
    body: serde_json::Value,
    kind: EnvelopeKind,
) -> Result<T, FleetError> {
    if let Ok(sealed) = serde_json::from_value::<crypto::EncryptedPayload>(body.clone()) {
        let key = state
            .config
            .read()
            .await
            .encryption_key()
            .ok_or_else(|| FleetError::ContractViolation("server has no encryption key configured".into()))?;
        let plaintext =
            crypto::open(&key, &sealed, kind).map_err(|_| FleetError::ContractViolation("envelope decryption failed".into()))?;
        serde_json::from_slice(&plaintext).map_err(|e| FleetError::ContractViolation(e.to_string()))
    } else {
        serde_json::from_value(body).map_err(|e| FleetError::ContractViolation(e.to_string()))
    }
}

pub async fn report(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ReportAck>, FleetError> {
    if state.ingest_permits.try_acquire().is_err() {
        state.store.record_dropped_report();
        return Err(FleetError::Overloaded);
    }

    let report: ReportBody = open_if_sealed(&state, body, EnvelopeKind::Report).await?;
    state
        .store
        .upsert_report(&report.machine_id, report.machine_info, report.metrics)
        .await;
    Ok(Json(ReportAck { accepted: true }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WidgetLogBody {
    pub machine_id: String,
    pub events: Vec<crate::store::WidgetLogEntry>,
}

pub async fn widget_logs(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ReportAck>, FleetError> {
    let parsed: WidgetLogBody = open_if_sealed(&state, body, EnvelopeKind::WidgetLog).await?;
    let count = parsed.events.len();
    state.store.append_widget_logs(&parsed.machine_id, parsed.events).await;
    tracing::debug!(machine_id = %parsed.machine_id, count, "widget-log batch appended");
    Ok(Json(ReportAck { accepted: true }))
}

pub async fn speedtest_report(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ReportAck>, FleetError> {
    let result: SpeedtestResult = open_if_sealed(&state, body, EnvelopeKind::Speedtest).await?;
    state.speedtest.insert_result(&result).await?;
    Ok(Json(ReportAck { accepted: true }))
}

const COMMAND_POLL_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn poll_commands(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<String>,
) -> Json<Vec<CommandEnvelope>> {
    let deadline = tokio::time::Instant::now() + COMMAND_POLL_TIMEOUT;
    loop {
        let commands = state.store.dequeue_commands(&machine_id).await;
        if !commands.is_empty() || tokio::time::Instant::now() >= deadline {
            return Json(commands);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[derive(Debug, Deserialize)]
pub struct AckBody {
    pub command_id: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

pub async fn ack_command(
    _auth: ApiKeyAuth,
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<String>,
    Json(body): Json<AckBody>,
) -> Result<Json<ReportAck>, FleetError> {
    state
        .store
        .ack_command(&machine_id, &body.command_id, body.result)
        .await
        .map_err(store_error_to_fleet_error)?;
    Ok(Json(ReportAck { accepted: true }))
}

fn store_error_to_fleet_error(e: crate::store::StoreError) -> FleetError {
    match e {
        crate::store::StoreError::UnknownMachine(_) | crate::store::StoreError::UnknownCommand { .. } => FleetError::NotFound,
        crate::store::StoreError::QueueFull(_) => FleetError::QueueFull,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_body_deserializes_from_plain_json() {
        let json = serde_json::json!({
            "machine_id": "m1",
            "machine_info": {
                "machine_id": "m1",
                "os": "macOS",
                "arch": "arm64",
                "os_version": "14.0",
                "total_memory_bytes": 0,
                "hardware_serial": null,
                "local_ip": null
            },
            "metrics": {
                "ts": "2026-01-01T00:00:00Z",
                "cpu_percent": 1.0,
                "memory_used_bytes": 0,
                "memory_total_bytes": 0,
                "memory_percent": 0.0,
                "disk_used_bytes": 0,
                "disk_total_bytes": 0,
                "disk_percent": 0.0,
                "network_bytes_sent": 0,
                "network_bytes_received": 0,
                "battery_percent": null,
                "battery_plugged": null,
                "temperature_celsius": null,
                "uptime_seconds": null
            }
        });
        let parsed: ReportBody = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.machine_id, "m1");
    }
}
