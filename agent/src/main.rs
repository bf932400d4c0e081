// File: agent/src/main.rs
use agent::config;
use agent::http::{create_router, AppState};
use agent::jobs::JobManager;
use agent::monitors::Registry;
use agent::reporter::Reporter;
use agent::types::{MachineDescriptor, MetricSample};
use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG_ERROR: i32 = 64;
const EXIT_SERVICE_UNAVAILABLE: i32 = 69;
const EXIT_INTERNAL_ERROR: i32 = 70;

#[derive(Parser, Debug)]
#[command(name = "atlas-agent")]
struct Cli {
    #[arg(long, env = "FLEET_SERVER_URL")]
    server: Option<String>,
    #[arg(long, env = "FLEET_API_KEY")]
    api_key: Option<String>,
    #[arg(long, env = "FLEET_ENCRYPTION_KEY")]
    encryption_key: Option<String>,
    #[arg(long, env = "FLEET_SERVER_PORT")]
    port: Option<u16>,
    #[arg(long)]
    interval: Option<u64>,
    #[arg(long)]
    no_menubar: bool,
    #[arg(long, default_value = "agent.toml")]
    config: std::path::PathBuf,
    #[arg(long, env = "FLEET_DATA_DIR", default_value = "monitor-data")]
    data_dir: std::path::PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let env: std::collections::HashMap<String, String> = std::env::vars().collect();

    let mut cfg = match config::load(Some(&cli.config), &env) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if let Some(server) = cli.server {
        cfg.fleet_server_url = server;
    }
    if let Some(api_key) = cli.api_key {
        cfg.api_key = api_key;
    }
    if let Some(key) = cli.encryption_key {
        cfg.encryption_key_hex = key;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(interval) = cli.interval {
        cfg.report_interval_seconds = interval;
    }
    cfg.no_menubar = cfg.no_menubar || cli.no_menubar;

    if let Err(e) = cfg.validate() {
        eprintln!("config error: {e}");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    let hostname = hostname_or_default();
    info!(hostname = %hostname, server = %cfg.fleet_server_url, "starting atlas-agent");

    if let Err(e) = std::fs::create_dir_all(&cli.data_dir) {
        eprintln!("failed to create data directory {}: {e}", cli.data_dir.display());
        std::process::exit(EXIT_INTERNAL_ERROR);
    }

    let registry = match Registry::new("1.1.1.1".to_string(), &cli.data_dir) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            eprintln!("failed to open monitor csv logs under {}: {e}", cli.data_dir.display());
            std::process::exit(EXIT_INTERNAL_ERROR);
        }
    };
    registry.start_all().await;

    let reporter = Reporter::new(
        cfg.fleet_server_url.clone(),
        cfg.api_key.clone(),
        cfg.encryption_key(),
        Duration::from_secs(cfg.report_interval_seconds),
    );
    let hostname_for_reporter = hostname.clone();
    let registry_for_reporter = Arc::clone(&registry);
    reporter.spawn(move || {
        let hostname_for_reporter = hostname_for_reporter.clone();
        let registry_for_reporter = Arc::clone(&registry_for_reporter);
        async move {
            let descriptor = MachineDescriptor {
                machine_id: hostname_for_reporter,
                os: "macOS".to_string(),
                arch: std::env::consts::ARCH.to_string(),
                os_version: os_version_or_default(),
                total_memory_bytes: 0,
                hardware_serial: None,
                local_ip: None,
            };
            let snapshot = registry_for_reporter.system_snapshot().await;
            let metrics = MetricSample {
                ts: chrono::Utc::now(),
                cpu_percent: snapshot.cpu_percent,
                memory_used_bytes: snapshot.memory_used_bytes,
                memory_total_bytes: 0,
                memory_percent: snapshot.memory_percent,
                disk_used_bytes: snapshot.disk_used_bytes,
                disk_total_bytes: snapshot.disk_total_bytes,
                disk_percent: snapshot.disk_percent,
                network_bytes_sent: 0,
                network_bytes_received: 0,
                battery_percent: snapshot.battery_percent,
                battery_plugged: None,
                temperature_celsius: None,
                uptime_seconds: None,
            };
            (descriptor, metrics)
        }
    });

    let state = Arc::new(AppState {
        registry,
        jobs: JobManager::new(),
        reporter,
        started_at: Instant::now(),
        hostname,
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
        fleet_server_url: cfg.fleet_server_url.clone(),
    });

    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(addr = %addr, error = %e, "failed to bind agent HTTP surface");
            std::process::exit(EXIT_SERVICE_UNAVAILABLE);
        }
    };

    info!(addr = %addr, "agent HTTP surface listening");
    if let Err(e) = axum::serve(listener, app).await {
        warn!(error = %e, "agent HTTP server exited");
    }
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

/// macOS version string, read from `sw_vers -productVersion`; "unknown" when
/// the probe binary is absent (e.g. in CI/non-macOS dev environments).
fn os_version_or_default() -> String {
    std::process::Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
