// File: fleet-server/src/main.rs
use clap::Parser;
use fleet_server::config::{self, ServerConfig};
use fleet_server::speedtest::Aggregator;
use fleet_server::store::Store;
use fleet_server::web;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG_ERROR: i32 = 64;
const EXIT_SERVICE_UNAVAILABLE: i32 = 69;
const EXIT_INTERNAL_ERROR: i32 = 70;

#[derive(Parser, Debug)]
#[command(name = "atlas-fleet-server")]
struct Cli {
    #[arg(long, default_value = "fleet-server.toml")]
    config: std::path::PathBuf,
    #[arg(long)]
    dev_mode: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let env: std::collections::HashMap<String, String> = std::env::vars().collect();

    let mut cfg: ServerConfig = match config::load(Some(&cli.config), &env) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    cfg.dev_mode = cfg.dev_mode || cli.dev_mode;
    if cfg.dev_mode {
        warn!("dev_mode is enabled: TLS hostname verification on outgoing agent probes is relaxed");
    }

    info!(port = cfg.port, "starting atlas-fleet-server");

    let store = Arc::new(Store::new(cfg.report_timeout_seconds as i64));
    let registry_path = std::path::PathBuf::from("data/registry.blob");
    if let Err(e) = store.load_on_start(&registry_path, cfg.encryption_key().as_ref()).await {
        warn!(error = %e, "failed to load persisted registry, starting empty");
    }

    let speedtest = match Aggregator::connect("sqlite://data/speedtest.db?mode=rwc").await {
        Ok(agg) => agg,
        Err(e) => {
            eprintln!("internal error opening speedtest store: {e}");
            std::process::exit(EXIT_INTERNAL_ERROR);
        }
    };

    let probe_period = std::time::Duration::from_secs(cfg.probe_period_seconds);
    let probe_max_in_flight = cfg.probe_max_in_flight;

    let state = fleet_server::build_state(cfg.clone(), cli.config.clone(), Arc::clone(&store), speedtest).await;

    let probe_scheduler = Arc::new(fleet_server::probe::ProbeScheduler::new(
        Arc::clone(&store),
        probe_period,
        probe_max_in_flight,
    ));
    let _probe_handle = probe_scheduler.spawn();

    let persist_store = Arc::clone(&store);
    let persist_key = cfg.encryption_key();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = persist_store.persist_now(&registry_path, persist_key.as_ref()).await {
                warn!(error = %e, "periodic registry persist failed");
            }
        }
    });

    let app = web::create_router(state);
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(addr = %addr, error = %e, "failed to bind fleet-server HTTP surface");
            std::process::exit(EXIT_SERVICE_UNAVAILABLE);
        }
    };

    info!(addr = %addr, "fleet-server HTTP surface listening");
    if let Err(e) = axum::serve(listener, app).await {
        warn!(error = %e, "fleet-server HTTP server exited");
    }
}
