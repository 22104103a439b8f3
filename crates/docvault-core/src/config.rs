//! Runtime configuration.
//!
//! Read from a JSON file (default `<data_dir>/config.json`), with the master
//! secret taken from `DOCVAULT_MASTER_KEY` when set.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::error::{ConfigError, Result};
use crate::key_wrap::MasterKey;
use crate::paths;

pub const MASTER_KEY_ENV: &str = "DOCVAULT_MASTER_KEY";
pub const DEFAULT_AUDIT_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;

pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

#[derive(Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_secret: Option<Zeroizing<String>>,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub database_path: PathBuf,
    pub audit_log_path: PathBuf,
    #[serde(default = "default_audit_log_max_bytes")]
    pub audit_log_max_bytes: u64,
}

/// On-disk shape: every field optional, missing ones fall back to defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    master_secret: Option<Zeroizing<String>>,
    private_key_path: Option<PathBuf>,
    public_key_path: Option<PathBuf>,
    database_path: Option<PathBuf>,
    audit_log_path: Option<PathBuf>,
    audit_log_max_bytes: Option<u64>,
}

impl VaultConfig {
    /// Defaults rooted at `dir`.
    pub fn for_data_dir(dir: &Path) -> Self {
        let keys = dir.join("keys");
        Self {
            master_secret: None,
            private_key_path: keys.join(PRIVATE_KEY_FILE),
            public_key_path: keys.join(PUBLIC_KEY_FILE),
            database_path: dir.join("documents.db"),
            audit_log_path: dir.join("logs").join("audit.log"),
            audit_log_max_bytes: DEFAULT_AUDIT_LOG_MAX_BYTES,
        }
    }

    /// Load configuration. An explicitly named file must exist; the default
    /// file is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let data_dir = paths::data_dir().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let (file_path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => (
                paths::config_path().map_err(|e| ConfigError::Invalid(e.to_string()))?,
                false,
            ),
        };
        let mut config = Self::for_data_dir(&data_dir);
        if file_path.exists() {
            let raw = fs::read_to_string(&file_path).map_err(|e| {
                ConfigError::Invalid(format!("read {}: {e}", file_path.display()))
            })?;
            let file: ConfigFile = serde_json::from_str(&raw).map_err(|e| {
                ConfigError::Invalid(format!("parse {}: {e}", file_path.display()))
            })?;
            config.apply(file, &data_dir);
        } else if required {
            return Err(ConfigError::Invalid(format!(
                "config file not found: {}",
                file_path.display()
            ))
            .into());
        }
        config.apply_env();
        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile, base: &Path) {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        if file.master_secret.is_some() {
            self.master_secret = file.master_secret;
        }
        if let Some(p) = file.private_key_path {
            self.private_key_path = resolve(p);
        }
        if let Some(p) = file.public_key_path {
            self.public_key_path = resolve(p);
        }
        if let Some(p) = file.database_path {
            self.database_path = resolve(p);
        }
        if let Some(p) = file.audit_log_path {
            self.audit_log_path = resolve(p);
        }
        if let Some(max) = file.audit_log_max_bytes {
            self.audit_log_max_bytes = max;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(MASTER_KEY_ENV) {
            self.master_secret = Some(Zeroizing::new(secret));
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.master_secret {
            Some(s) if !s.is_empty() => {}
            _ => return Err(ConfigError::MissingMasterSecret.into()),
        }
        if self.audit_log_max_bytes == 0 {
            return Err(ConfigError::Invalid("audit_log_max_bytes must be positive".into()).into());
        }
        Ok(())
    }

    pub fn master_key(&self) -> Result<MasterKey> {
        let secret = self
            .master_secret
            .as_ref()
            .ok_or(ConfigError::MissingMasterSecret)?;
        MasterKey::from_secret(secret)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("master_secret", &self.master_secret.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .field("database_path", &self.database_path)
            .field("audit_log_path", &self.audit_log_path)
            .field("audit_log_max_bytes", &self.audit_log_max_bytes)
            .finish()
    }
}

fn default_audit_log_max_bytes() -> u64 {
    DEFAULT_AUDIT_LOG_MAX_BYTES
}
