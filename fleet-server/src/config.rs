// File: fleet-server/src/config.rs
//
// Layered configuration for the Fleet Server: compiled defaults, TOML user
// file, environment variables, in increasing precedence. Adds the encrypted-
// at-rest persistence and startup validation refusals the reference
// workspace's plaintext config never needed.
use crate::crypto::{self, EnvelopeKind, KEY_LEN};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value at {path}: {reason}")]
    InvalidValue { path: String, reason: String },
    #[error("bcrypt cost {0} below minimum of 10")]
    WeakBcryptCost(u32),
    #[error("kdf iterations {0} below minimum of 100000")]
    WeakKdfIterations(u32),
    #[error("key at {path} is {len} bytes, need >= 32")]
    KeyTooShort { path: String, len: usize },
    #[error("port {0} outside [1,65535]")]
    PortOutOfRange(u32),
    #[error("ssl enabled but cert files are missing")]
    SslMissingCerts,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default)]
    pub admin_password_hash: String,
    #[serde(default)]
    pub encryption_key_hex: String,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    #[serde(default = "default_report_timeout")]
    pub report_timeout_seconds: u64,
    #[serde(default = "default_probe_period")]
    pub probe_period_seconds: u64,
    #[serde(default = "default_probe_max_in_flight")]
    pub probe_max_in_flight: usize,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    #[serde(default)]
    pub ssl_enabled: bool,
    #[serde(default)]
    pub ssl_cert_path: Option<String>,
    #[serde(default)]
    pub ssl_key_path: Option<String>,
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8768
}
fn default_kdf_iterations() -> u32 {
    600_000
}
fn default_bcrypt_cost() -> u32 {
    12
}
fn default_report_timeout() -> u64 {
    60
}
fn default_probe_period() -> u64 {
    60
}
fn default_probe_max_in_flight() -> usize {
    32
}
fn default_session_ttl() -> u64 {
    8 * 3600
}
fn default_min_password_length() -> usize {
    12
}
fn default_admin_username() -> String {
    "admin".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: String::new(),
            admin_username: default_admin_username(),
            admin_password_hash: String::new(),
            encryption_key_hex: String::new(),
            kdf_iterations: default_kdf_iterations(),
            bcrypt_cost: default_bcrypt_cost(),
            report_timeout_seconds: default_report_timeout(),
            probe_period_seconds: default_probe_period(),
            probe_max_in_flight: default_probe_max_in_flight(),
            session_ttl_seconds: default_session_ttl(),
            ssl_enabled: false,
            ssl_cert_path: None,
            ssl_key_path: None,
            dev_mode: false,
            min_password_length: default_min_password_length(),
        }
    }
}

impl ServerConfig {
    pub fn encryption_key(&self) -> Option<[u8; KEY_LEN]> {
        let bytes = hex_decode(&self.encryption_key_hex)?;
        if bytes.len() != KEY_LEN {
            return None;
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Some(key)
    }

    /// Enforces every startup refusal named in the config-store contract.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bcrypt_cost < 10 {
            return Err(ConfigError::WeakBcryptCost(self.bcrypt_cost));
        }
        if self.kdf_iterations < 100_000 {
            return Err(ConfigError::WeakKdfIterations(self.kdf_iterations));
        }
        if !self.encryption_key_hex.is_empty() {
            let len = hex_decode(&self.encryption_key_hex).map(|b| b.len()).unwrap_or(0);
            if len < KEY_LEN {
                return Err(ConfigError::KeyTooShort {
                    path: "encryption_key_hex".into(),
                    len,
                });
            }
        }
        if self.port == 0 {
            return Err(ConfigError::PortOutOfRange(self.port as u32));
        }
        if self.ssl_enabled {
            let cert_ok = self.ssl_cert_path.as_ref().is_some_and(|p| Path::new(p).exists());
            let key_ok = self.ssl_key_path.as_ref().is_some_and(|p| Path::new(p).exists());
            if !cert_ok || !key_ok {
                return Err(ConfigError::SslMissingCerts);
            }
        }
        if self.dev_mode {
            tracing::warn!("dev_mode is enabled: outbound certificate verification to agents is relaxed");
        }
        Ok(())
    }

    /// Reads a single field by its serde name, for the admin config-get route.
    /// Round-trips through `serde_json::Value` rather than matching on field
    /// names directly, so adding a field here never needs a matching match arm.
    pub fn get(&self, path: &str) -> Option<serde_json::Value> {
        let value = serde_json::to_value(self).ok()?;
        value.get(path).cloned()
    }

    /// Writes a single field by its serde name and re-validates the whole
    /// config before accepting the change, so a bad write can never leave the
    /// server running with a refused configuration.
    pub fn set(&mut self, path: &str, new_value: serde_json::Value) -> Result<(), ConfigError> {
        let mut value = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let obj = value.as_object_mut().ok_or_else(|| ConfigError::InvalidValue {
            path: path.to_string(),
            reason: "config is not an object".into(),
        })?;
        if !obj.contains_key(path) {
            return Err(ConfigError::InvalidValue {
                path: path.to_string(),
                reason: "unknown config field".into(),
            });
        }
        obj.insert(path.to_string(), new_value);
        let updated: ServerConfig = serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

pub fn load(path: Option<&Path>, env: &std::collections::HashMap<String, String>) -> Result<ServerConfig, ConfigError> {
    let mut cfg = ServerConfig::default();

    if let Some(path) = path {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            cfg = toml::from_str(&text).map_err(|e| ConfigError::InvalidValue {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
    }

    if let Some(v) = env.get("FLEET_API_KEY") {
        cfg.api_key = v.clone();
    }
    if let Some(v) = env.get("FLEET_ENCRYPTION_KEY") {
        cfg.encryption_key_hex = v.clone();
    }
    if let Some(v) = env.get("FLEET_SERVER_PORT") {
        cfg.port = v.parse().map_err(|_| ConfigError::InvalidValue {
            path: "FLEET_SERVER_PORT".into(),
            reason: "not a valid port number".into(),
        })?;
    }
    if let Some(v) = env.get("FLEET_SSL_ENABLED") {
        cfg.ssl_enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Some(v) = env.get("FLEET_MIN_PASSWORD_LENGTH") {
        cfg.min_password_length = v.parse().map_err(|_| ConfigError::InvalidValue {
            path: "FLEET_MIN_PASSWORD_LENGTH".into(),
            reason: "not a valid integer".into(),
        })?;
    }

    cfg.validate()?;
    Ok(cfg)
}

/// Writes `cfg` back to its plain TOML file, the same layer `load` reads from
/// precedence-wise. Used for runtime-triggered persistence (e.g. the
/// legacy-password-hash migration on login) where there is no operator
/// passphrase available to drive `save_encrypted`'s envelope.
pub fn save(cfg: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(cfg).map_err(|e| ConfigError::InvalidValue {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    write_0600(path, text.as_bytes())
}

pub fn save_encrypted(cfg: &ServerConfig, path: &Path, password: &[u8]) -> Result<(), ConfigError> {
    let plaintext = toml::to_string_pretty(cfg).map_err(|e| ConfigError::InvalidValue {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = crypto::derive_key(password, &salt, cfg.kdf_iterations);
    let sealed = crypto::seal(&key, plaintext.as_bytes(), EnvelopeKind::ConfigAtRest).map_err(|_| ConfigError::InvalidValue {
        path: path.display().to_string(),
        reason: "sealing failed".into(),
    })?;

    let encrypted_path = encrypted_path_for(path);
    let salt_path = salt_path_for(path);
    let blob = serde_json::to_vec(&sealed).map_err(|e| ConfigError::InvalidValue {
        path: encrypted_path.display().to_string(),
        reason: e.to_string(),
    })?;

    write_0600(&encrypted_path, &blob)?;
    write_0600(&salt_path, &salt)?;

    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

pub fn load_encrypted(path: &Path, password: &[u8]) -> Result<ServerConfig, ConfigError> {
    let encrypted_path = encrypted_path_for(path);
    let salt_path = salt_path_for(path);
    let blob = std::fs::read(&encrypted_path)?;
    let salt = std::fs::read(&salt_path)?;
    let sealed: crypto::EncryptedPayload = serde_json::from_slice(&blob).map_err(|e| ConfigError::InvalidValue {
        path: encrypted_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let key = crypto::derive_key(password, &salt, default_kdf_iterations());
    let plaintext = crypto::open(&key, &sealed, EnvelopeKind::ConfigAtRest).map_err(|_| ConfigError::InvalidValue {
        path: encrypted_path.display().to_string(),
        reason: "decryption failed".into(),
    })?;
    let text = String::from_utf8(plaintext).map_err(|e| ConfigError::InvalidValue {
        path: encrypted_path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::InvalidValue {
        path: encrypted_path.display().to_string(),
        reason: e.to_string(),
    })
}

fn encrypted_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".encrypted");
    PathBuf::from(s)
}

fn salt_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".salt");
    PathBuf::from(s)
}

fn write_0600(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    std::fs::write(path, bytes)?;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn weak_bcrypt_cost_is_refused() {
        let mut cfg = ServerConfig::default();
        cfg.bcrypt_cost = 8;
        assert!(matches!(cfg.validate(), Err(ConfigError::WeakBcryptCost(8))));
    }

    #[test]
    fn weak_kdf_iterations_is_refused() {
        let mut cfg = ServerConfig::default();
        cfg.kdf_iterations = 1_000;
        assert!(matches!(cfg.validate(), Err(ConfigError::WeakKdfIterations(1_000))));
    }

    #[test]
    fn ssl_enabled_without_certs_is_refused() {
        let mut cfg = ServerConfig::default();
        cfg.ssl_enabled = true;
        assert!(matches!(cfg.validate(), Err(ConfigError::SslMissingCerts)));
    }

    #[test]
    fn save_then_load_encrypted_round_trips_and_removes_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "api_key = \"plain\"\n").unwrap();
        let mut cfg = ServerConfig::default();
        cfg.api_key = "k1".to_string();
        save_encrypted(&cfg, &path, b"hunter2").unwrap();
        assert!(!path.exists());
        assert!(encrypted_path_for(&path).exists());
        let loaded = load_encrypted(&path, b"hunter2").unwrap();
        assert_eq!(loaded.api_key, "k1");
    }
}
