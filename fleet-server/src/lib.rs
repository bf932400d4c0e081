// File: fleet-server/src/lib.rs
pub mod auth;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod ingest;
pub mod probe;
pub mod speedtest;
pub mod store;
pub mod web;

use auth::SessionStore;
use config::ServerConfig;
use speedtest::Aggregator;
use std::sync::Arc;
use store::Store;
use tokio::sync::{RwLock, Semaphore};

pub use config::ConfigError;
pub use errors::FleetError;

const DEFAULT_INGEST_PERMITS: usize = 64;

pub struct AppState {
    pub config: RwLock<ServerConfig>,
    pub config_path: std::path::PathBuf,
    pub store: Arc<Store>,
    pub sessions: Arc<SessionStore>,
    pub speedtest: Aggregator,
    pub ingest_permits: Semaphore,
}

impl axum::extract::FromRef<Arc<AppState>> for Arc<SessionStore> {
    fn from_ref(state: &Arc<AppState>) -> Arc<SessionStore> {
        Arc::clone(&state.sessions)
    }
}

pub async fn build_state(cfg: ServerConfig, config_path: std::path::PathBuf, store: Arc<Store>, speedtest: Aggregator) -> Arc<AppState> {
    Arc::new(AppState {
        sessions: Arc::new(SessionStore::new(cfg.session_ttl_seconds)),
        ingest_permits: Semaphore::new(DEFAULT_INGEST_PERMITS),
        config: RwLock::new(cfg),
        config_path,
        store,
        speedtest,
    })
}
