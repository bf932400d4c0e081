// File: agent/src/config.rs
//
// Layered configuration: compiled defaults, then a TOML user file, then
// environment variables, in that order of increasing precedence. Follows the
// reference workspace's ConfigManager in spirit (load file, overlay) but adds
// the env-var overlay pass and encrypted-at-rest persistence the reference
// workspace's plaintext secrets.toml never needed.
use crate::crypto::{self, EnvelopeKind, KEY_LEN};
use crate::errors::ConfigError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_server_url")]
    pub fleet_server_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub encryption_key_hex: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
    #[serde(default)]
    pub no_menubar: bool,
}

fn default_server_url() -> String {
    "https://localhost:8768".to_string()
}
fn default_port() -> u16 {
    8767
}
fn default_report_interval() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            fleet_server_url: default_server_url(),
            api_key: String::new(),
            encryption_key_hex: String::new(),
            port: default_port(),
            report_interval_seconds: default_report_interval(),
            no_menubar: false,
        }
    }
}

impl AgentConfig {
    pub fn encryption_key(&self) -> Option<[u8; KEY_LEN]> {
        let bytes = hex_decode(&self.encryption_key_hex)?;
        if bytes.len() != KEY_LEN {
            return None;
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Some(key)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::PortOutOfRange(self.port as u32));
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
        Ok(())
    }

    /// Reads a single field by its serde name.
    pub fn get(&self, path: &str) -> Option<serde_json::Value> {
        let value = serde_json::to_value(self).ok()?;
        value.get(path).cloned()
    }

    /// Writes a single field by its serde name and re-validates the whole
    /// config before accepting the change.
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
        let updated: AgentConfig = serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

/// Loads a config by merging compiled defaults, an optional TOML file, and
/// environment variable overrides, in that precedence order.
pub fn load(path: Option<&Path>, env: &std::collections::HashMap<String, String>) -> Result<AgentConfig, ConfigError> {
    let mut cfg = AgentConfig::default();

    if let Some(path) = path {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            cfg = toml::from_str(&text).map_err(|e| ConfigError::InvalidValue {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
    }

    if let Some(v) = env.get("FLEET_SERVER_URL") {
        cfg.fleet_server_url = v.clone();
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

    cfg.validate()?;
    Ok(cfg)
}

/// Seals `cfg` with a password-derived key and writes `<path>.encrypted` and
/// `<path>.salt` at mode 0600, removing any plaintext file at `path`.
pub fn save_encrypted(cfg: &AgentConfig, path: &Path, password: &[u8]) -> Result<(), ConfigError> {
    let plaintext = toml::to_string_pretty(cfg).map_err(|e| ConfigError::InvalidValue {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = crypto::derive_key(password, &salt, 600_000);
    let sealed = crypto::seal(&key, plaintext.as_bytes(), EnvelopeKind::ConfigAtRest)
        .map_err(|_| ConfigError::InvalidValue {
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

pub fn load_encrypted(path: &Path, password: &[u8]) -> Result<AgentConfig, ConfigError> {
    let encrypted_path = encrypted_path_for(path);
    let salt_path = salt_path_for(path);
    let blob = std::fs::read(&encrypted_path)?;
    let salt = std::fs::read(&salt_path)?;
    let sealed: crypto::EncryptedPayload = serde_json::from_slice(&blob).map_err(|e| ConfigError::InvalidValue {
        path: encrypted_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let key = crypto::derive_key(password, &salt, 600_000);
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
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn env_overlay_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "fleet_server_url = \"https://file.example\"\n").unwrap();
        let mut env = std::collections::HashMap::new();
        env.insert("FLEET_SERVER_URL".to_string(), "https://env.example".to_string());
        let cfg = load(Some(&path), &env).unwrap();
        assert_eq!(cfg.fleet_server_url, "https://env.example");
    }

    #[test]
    fn save_then_load_encrypted_round_trips_and_removes_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "api_key = \"plain\"\n").unwrap();
        let mut cfg = AgentConfig::default();
        cfg.api_key = "k1".to_string();
        save_encrypted(&cfg, &path, b"hunter2").unwrap();
        assert!(!path.exists());
        assert!(encrypted_path_for(&path).exists());
        assert!(salt_path_for(&path).exists());
        let loaded = load_encrypted(&path, b"hunter2").unwrap();
        assert_eq!(loaded.api_key, "k1");
    }
}
