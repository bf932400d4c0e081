// File: agent/src/monitors/mod.rs
pub mod disk;
pub mod framework;
pub mod network_quality;
pub mod peripheral;
pub mod ping;
pub mod power;
pub mod process;
pub mod rate_limit;
pub mod saas;
pub mod sample_source;
pub mod security;
pub mod speedtest;
pub mod vpn;
pub mod wifi;
pub mod wifi_roaming;

use self::disk::{DiskHealthMonitor, DiskHealthRecord};
use self::framework::MonitorWorker;
use self::network_quality::{NetworkQualityMonitor, NetworkQualityRecord};
use self::peripheral::{PeripheralMonitor, PeripheralSnapshotRecord};
use self::ping::{PingMonitor, PingRecord, SystemPingSource};
use self::power::{PowerMonitor, PowerRecord};
use self::process::{ProcessMonitor, ProcessSnapshotRecord};
use self::saas::{SaasEndpointRecord, SaasMonitor};
use self::security::{SecurityMonitor, SecurityPostureRecord};
use self::speedtest::{SpeedtestMonitor, SpeedtestRecord};
use self::vpn::{VpnMonitor, VpnRecord};
use self::wifi::{WifiMonitor, WifiRecord};
use self::wifi_roaming::{RoamSample, WifiRoamingMonitor};
use crate::errors::CsvError;
use crate::monitors::sample_source::SampleSource;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Stub production sample source shared by monitors whose real data comes
/// from a macOS shim that is out of scope for the core; it always reports
/// "no data yet" and logs once, per the missing-binary contract.
pub struct StubSource<R> {
    _marker: std::marker::PhantomData<R>,
}

impl<R> StubSource<R> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<R> Default for StubSource<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Clone + Send + Sync + 'static> SampleSource for StubSource<R> {
    type Record = R;

    async fn sample(&self) -> Result<Option<R>> {
        Ok(None)
    }
}

/// Explicit composition root for every monitor worker. There is no
/// process-level global accessor; embedders hold a `Registry` and reach
/// monitors through its typed methods.
pub struct Registry {
    pub ping: Arc<MonitorWorker<PingMonitor<SystemPingSource>>>,
    pub wifi: Arc<MonitorWorker<WifiMonitor<StubSource<WifiRecord>>>>,
    pub wifi_roaming: Arc<MonitorWorker<WifiRoamingMonitor<StubSource<RoamSample>>>>,
    pub speedtest: Arc<MonitorWorker<SpeedtestMonitor<StubSource<SpeedtestRecord>>>>,
    pub vpn: Arc<MonitorWorker<VpnMonitor<StubSource<VpnRecord>>>>,
    pub saas: Arc<MonitorWorker<SaasMonitor<StubSource<Vec<SaasEndpointRecord>>>>>,
    pub network_quality: Arc<MonitorWorker<NetworkQualityMonitor<StubSource<NetworkQualityRecord>>>>,
    pub peripheral: Arc<MonitorWorker<PeripheralMonitor<StubSource<Vec<PeripheralSnapshotRecord>>>>>,
    pub power: Arc<MonitorWorker<PowerMonitor<StubSource<PowerRecord>>>>,
    pub security: Arc<MonitorWorker<SecurityMonitor<StubSource<SecurityPostureRecord>>>>,
    pub disk: Arc<MonitorWorker<DiskHealthMonitor<StubSource<DiskHealthRecord>>>>,
    pub process: Arc<MonitorWorker<ProcessMonitor<StubSource<Vec<ProcessSnapshotRecord>>>>>,
}

impl Registry {
    /// Constructs every monitor worker, opening its `CSVStream` under
    /// `data_dir`. Fails fatally if any on-disk log has a header that no
    /// longer matches its declared record schema.
    pub fn new(ping_target: String, data_dir: &Path) -> Result<Self, CsvError> {
        Ok(Self {
            ping: MonitorWorker::new(PingMonitor::new(Arc::new(SystemPingSource { target: ping_target })), data_dir)?,
            wifi: MonitorWorker::new(WifiMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            wifi_roaming: MonitorWorker::new(WifiRoamingMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            speedtest: MonitorWorker::new(SpeedtestMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            vpn: MonitorWorker::new(VpnMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            saas: MonitorWorker::new(SaasMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            network_quality: MonitorWorker::new(NetworkQualityMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            peripheral: MonitorWorker::new(PeripheralMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            power: MonitorWorker::new(PowerMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            security: MonitorWorker::new(SecurityMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            disk: MonitorWorker::new(DiskHealthMonitor::new(Arc::new(StubSource::new())), data_dir)?,
            process: MonitorWorker::new(ProcessMonitor::new(Arc::new(StubSource::new())), data_dir)?,
        })
    }

    /// Starts every monitor worker at its own default cadence.
    pub async fn start_all(&self) {
        self.ping.start(None).await;
        self.wifi.start(None).await;
        self.wifi_roaming.start(None).await;
        self.speedtest.start(None).await;
        self.vpn.start(None).await;
        self.saas.start(None).await;
        self.network_quality.start(None).await;
        self.peripheral.start(None).await;
        self.power.start(None).await;
        self.security.start(None).await;
        self.disk.start(None).await;
        self.process.start(None).await;
    }

    pub async fn stop_all(&self) {
        let wait = std::time::Duration::from_secs(5);
        self.ping.stop(wait).await;
        self.wifi.stop(wait).await;
        self.wifi_roaming.stop(wait).await;
        self.speedtest.stop(wait).await;
        self.vpn.stop(wait).await;
        self.saas.stop(wait).await;
        self.network_quality.stop(wait).await;
        self.peripheral.stop(wait).await;
        self.power.stop(wait).await;
        self.security.stop(wait).await;
        self.disk.stop(wait).await;
        self.process.stop(wait).await;
    }

    /// Name -> running flag, for the agent health endpoint.
    pub async fn status_map(&self) -> std::collections::BTreeMap<String, bool> {
        let mut map = std::collections::BTreeMap::new();
        map.insert(self.ping.name().to_string(), self.ping.state().await == framework::MonitorState::Running);
        map.insert(self.wifi.name().to_string(), self.wifi.state().await == framework::MonitorState::Running);
        map.insert(self.wifi_roaming.name().to_string(), self.wifi_roaming.state().await == framework::MonitorState::Running);
        map.insert(self.speedtest.name().to_string(), self.speedtest.state().await == framework::MonitorState::Running);
        map.insert(self.vpn.name().to_string(), self.vpn.state().await == framework::MonitorState::Running);
        map.insert(self.saas.name().to_string(), self.saas.state().await == framework::MonitorState::Running);
        map.insert(self.network_quality.name().to_string(), self.network_quality.state().await == framework::MonitorState::Running);
        map.insert(self.peripheral.name().to_string(), self.peripheral.state().await == framework::MonitorState::Running);
        map.insert(self.power.name().to_string(), self.power.state().await == framework::MonitorState::Running);
        map.insert(self.security.name().to_string(), self.security.state().await == framework::MonitorState::Running);
        map.insert(self.disk.name().to_string(), self.disk.state().await == framework::MonitorState::Running);
        map.insert(self.process.name().to_string(), self.process.state().await == framework::MonitorState::Running);
        map
    }

    /// Lightweight self-sample drawn from whichever monitors have produced a
    /// result so far, not a full extra monitor cycle. Used by both the health
    /// endpoint and the reporter's outbound metric sample; fields with no
    /// backing monitor are left at their no-data default.
    pub async fn system_snapshot(&self) -> SystemSnapshot {
        let disk = self.disk.last_result().await;
        let power = self.power.last_result().await;
        let process = self.process.last_result().await;

        let (disk_used_bytes, disk_total_bytes, disk_percent) = match &disk {
            Some(d) if d.capacity_bytes > 0 => (d.used_bytes, d.capacity_bytes, d.used_bytes as f64 / d.capacity_bytes as f64 * 100.0),
            Some(d) => (d.used_bytes, d.capacity_bytes, 0.0),
            None => (0, 0, 0.0),
        };
        // PowerRecord carries mAh capacities, not a charge percentage; this
        // approximates remaining charge as current-over-design capacity.
        let battery_percent = power.as_ref().and_then(|p| {
            if p.design_capacity_mah > 0 {
                Some((p.current_capacity_mah as f64 / p.design_capacity_mah as f64 * 100.0).clamp(0.0, 100.0))
            } else {
                None
            }
        });
        let cpu_percent = process.as_ref().map(|p| p.cpu_percent).unwrap_or(0.0);
        let memory_used_bytes = process.as_ref().map(|p| p.memory_bytes).unwrap_or(0);

        SystemSnapshot {
            cpu_percent,
            memory_used_bytes,
            memory_percent: 0.0,
            disk_used_bytes,
            disk_total_bytes,
            disk_percent,
            battery_percent,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_percent: f64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_percent: f64,
    pub battery_percent: Option<f64>,
}
