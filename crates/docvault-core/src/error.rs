use std::fmt;
use thiserror::Error;

/// Which half of the signing keypair a key-load failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Private,
    Public,
}

impl KeyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRole::Private => "private",
            KeyRole::Public => "public",
        }
    }

    /// Text that must appear in a PEM file holding a key of this role.
    pub fn pem_marker(&self) -> &'static str {
        match self {
            KeyRole::Private => "PRIVATE KEY",
            KeyRole::Public => "PUBLIC KEY",
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load {role} key: {cause}")]
    KeyLoad { role: KeyRole, cause: String },

    #[error("master key secret is missing or empty")]
    MissingMasterSecret,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("no document content supplied")]
    EmptyInput,

    #[error("document missing required verification data: {}", .missing.join(", "))]
    IncompleteRecord { missing: Vec<&'static str> },

    #[error("document integrity check failed (expected {expected}, got {actual})")]
    IntegrityViolation { expected: String, actual: String },

    #[error("document signature verification failed")]
    SignatureMismatch,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("document processing failed: {0}")]
    Cipher(String),

    #[error("document not found or access denied")]
    NotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    pub(crate) fn key_load(role: KeyRole, cause: impl fmt::Display) -> Self {
        VaultError::Configuration(ConfigError::KeyLoad {
            role,
            cause: cause.to_string(),
        })
    }

    /// Only configuration problems stop the process from serving requests.
    pub fn is_fatal_to_process(&self) -> bool {
        matches!(self, VaultError::Configuration(_))
    }

    /// True when the failure means stored content or signature no longer
    /// matches what was protected.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            VaultError::IntegrityViolation { .. }
                | VaultError::SignatureMismatch
                | VaultError::MalformedSignature(_)
                | VaultError::Cipher(_)
        )
    }

    /// Stable tag recorded in audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::Configuration(_) => "CONFIGURATION_ERROR",
            VaultError::EmptyInput => "EMPTY_INPUT",
            VaultError::IncompleteRecord { .. } => "INCOMPLETE_RECORD",
            VaultError::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
            VaultError::SignatureMismatch => "SIGNATURE_MISMATCH",
            VaultError::MalformedSignature(_) => "MALFORMED_SIGNATURE",
            VaultError::Cipher(_) => "CIPHER_ERROR",
            VaultError::NotFound => "NOT_FOUND",
            VaultError::InvalidInput(_) => "INVALID_INPUT",
            VaultError::Storage(_) | VaultError::Database(_) => "STORAGE_ERROR",
            VaultError::Io(_) => "IO_ERROR",
            VaultError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
