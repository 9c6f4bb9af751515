//! WolfGate Error Types

use thiserror::Error;

/// Result type alias for WolfGate operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfGate error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Key errors
    #[error("Key generation failed: {0}")]
    CryptoFailure(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    // Registry errors
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("User already exists: {0}")]
    DuplicateUsername(String),

    #[error("Public key already registered to user {0}")]
    DuplicatePublicKey(String),

    #[error("User not found: {0}")]
    NotFound(String),

    // Request validation errors
    #[error("Invalid username {0:?}: use 1-64 letters, digits, '.', '_', '-' or '@'")]
    InvalidUsername(String),

    #[error("Invalid allowed IPs {value:?}: {reason}")]
    InvalidAllowedIps { value: String, reason: String },

    #[error("Allowed IPs {requested} overlap {existing} ({owner})")]
    AddressConflict {
        requested: String,
        existing: String,
        owner: String,
    },

    // Gateway config file errors
    #[error("Malformed gateway config at line {line}: {reason}")]
    MalformedConfig { line: usize, reason: String },

    // Sync errors
    #[error("User {username} registered but gateway config not updated: {source}")]
    PartialFailure {
        username: String,
        #[source]
        source: Box<Error>,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PartialFailure { .. })
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            Error::CryptoFailure(_) => "CRYPTO_FAILURE",
            Error::InvalidKey(_) => "INVALID_KEY",
            Error::Registry(_) => "REGISTRY_ERROR",
            Error::DuplicateUsername(_) => "DUPLICATE_USERNAME",
            Error::DuplicatePublicKey(_) => "DUPLICATE_PUBLIC_KEY",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidUsername(_) => "INVALID_USERNAME",
            Error::InvalidAllowedIps { .. } => "INVALID_ALLOWED_IPS",
            Error::AddressConflict { .. } => "ADDRESS_CONFLICT",
            Error::MalformedConfig { .. } => "MALFORMED_CONFIG",
            Error::PartialFailure { .. } => "PARTIAL_FAILURE",
            Error::Io(_) => "IO_ERROR",
            Error::Network(_) => "NETWORK_ERROR",
        }
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedConfig {
            line,
            reason: reason.into(),
        }
    }
}
