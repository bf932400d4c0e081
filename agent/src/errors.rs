// File: agent/src/errors.rs
use std::fmt;

#[derive(Debug)]
pub enum AgentError {
    Config(ConfigError),
    Crypto(CryptoError),
    Csv(CsvError),
    Http(String),
    Other(anyhow::Error),
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { path: String, reason: String },
    WeakBcryptCost(u32),
    WeakKdfIterations(u32),
    KeyTooShort { path: String, len: usize },
    PortOutOfRange(u32),
    SslMissingCerts,
    Io(std::io::Error),
}

#[derive(Debug)]
pub enum CryptoError {
    AuthFailure,
    BadNonceLength,
    BadKeyLength,
}

#[derive(Debug)]
pub enum CsvError {
    HeaderMismatch { expected: Vec<String>, found: Vec<String> },
    UnknownField(String),
    Io(std::io::Error),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Config(e) => write!(f, "config error: {e}"),
            AgentError::Crypto(e) => write!(f, "crypto error: {e}"),
            AgentError::Csv(e) => write!(f, "csv error: {e}"),
            AgentError::Http(msg) => write!(f, "http error: {msg}"),
            AgentError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { path, reason } => {
                write!(f, "invalid value at {path}: {reason}")
            }
            ConfigError::WeakBcryptCost(c) => write!(f, "bcrypt cost {c} below minimum of 10"),
            ConfigError::WeakKdfIterations(i) => {
                write!(f, "kdf iterations {i} below minimum of 100000")
            }
            ConfigError::KeyTooShort { path, len } => {
                write!(f, "key at {path} is {len} bytes, need >= 32")
            }
            ConfigError::PortOutOfRange(p) => write!(f, "port {p} outside [1,65535]"),
            ConfigError::SslMissingCerts => write!(f, "ssl enabled but cert files are missing"),
            ConfigError::Io(e) => write!(f, "config io error: {e}"),
        }
    }
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::AuthFailure => write!(f, "authentication failure"),
            CryptoError::BadNonceLength => write!(f, "nonce must be 12 bytes"),
            CryptoError::BadKeyLength => write!(f, "key must be 32 bytes"),
        }
    }
}

impl fmt::Display for CsvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsvError::HeaderMismatch { expected, found } => write!(
                f,
                "csv header mismatch: expected {expected:?}, found {found:?}"
            ),
            CsvError::UnknownField(name) => write!(f, "unknown csv field: {name}"),
            CsvError::Io(e) => write!(f, "csv io error: {e}"),
        }
    }
}

impl std::error::Error for AgentError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for CryptoError {}
impl std::error::Error for CsvError {}

impl From<ConfigError> for AgentError {
    fn from(e: ConfigError) -> Self {
        AgentError::Config(e)
    }
}
impl From<CryptoError> for AgentError {
    fn from(e: CryptoError) -> Self {
        AgentError::Crypto(e)
    }
}
impl From<CsvError> for AgentError {
    fn from(e: CsvError) -> Self {
        AgentError::Csv(e)
    }
}
impl From<anyhow::Error> for AgentError {
    fn from(e: anyhow::Error) -> Self {
        AgentError::Other(e)
    }
}
impl From<std::io::Error> for CsvError {
    fn from(e: std::io::Error) -> Self {
        CsvError::Io(e)
    }
}
impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}
