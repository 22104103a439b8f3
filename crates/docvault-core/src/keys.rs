//! Signing key material.
//!
//! The keypair is read from PEM files at startup (PKCS#8 private key, SPKI
//! public key). Any problem is a fatal configuration error naming the key
//! role. The public key fingerprint is the first 16 hex characters of the
//! SHA-256 of the trimmed public key PEM text.

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{VaultConfig, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
use crate::digest::hash_bytes;
use crate::error::{KeyRole, Result, VaultError};
use crate::key_wrap::MasterKey;
use crate::signature::DocumentSigner;

pub const FINGERPRINT_LEN: usize = 16;

/// Everything the pipeline needs from configuration: the master key and the
/// document signer. Built once and shared read-only.
#[derive(Debug)]
pub struct KeyMaterial {
    master: MasterKey,
    signer: DocumentSigner,
}

impl KeyMaterial {
    pub fn new(master: MasterKey, signer: DocumentSigner) -> Self {
        Self { master, signer }
    }

    /// Load and validate all key material named by `config`.
    pub fn load(config: &VaultConfig) -> Result<Self> {
        config.validate()?;
        let master = config.master_key()?;
        let signer = load_signer(&config.private_key_path, &config.public_key_path)?;
        info!(fingerprint = %signer.fingerprint(), "key material loaded");
        Ok(Self { master, signer })
    }

    pub fn master(&self) -> &MasterKey {
        &self.master
    }

    pub fn signer(&self) -> &DocumentSigner {
        &self.signer
    }
}

/// Short, human-comparable identifier of a public key.
pub fn fingerprint_of(public_key_pem: &str) -> String {
    let mut digest = hash_bytes(public_key_pem.trim().as_bytes());
    digest.truncate(FINGERPRINT_LEN);
    digest
}

/// Read a PEM file and check it carries the marker for `role`.
pub fn load_pem(path: &Path, role: KeyRole) -> Result<String> {
    if !path.exists() {
        return Err(VaultError::key_load(
            role,
            format!("Key file not found: {}", path.display()),
        ));
    }
    let pem = fs::read_to_string(path).map_err(|e| VaultError::key_load(role, e))?;
    let pem = pem.trim().to_string();
    if !pem.contains(role.pem_marker()) {
        return Err(VaultError::key_load(role, format!("Invalid {role} key format")));
    }
    Ok(pem)
}

pub fn load_signer(private_path: &Path, public_path: &Path) -> Result<DocumentSigner> {
    let private_pem = load_pem(private_path, KeyRole::Private)?;
    let public_pem = load_pem(public_path, KeyRole::Public)?;
    signer_from_pem(&private_pem, &public_pem)
}

/// Build a signer from PEM text; the public key must belong to the private key.
pub fn signer_from_pem(private_pem: &str, public_pem: &str) -> Result<DocumentSigner> {
    if !private_pem.contains(KeyRole::Private.pem_marker()) {
        return Err(VaultError::key_load(KeyRole::Private, "Invalid private key format"));
    }
    if !public_pem.contains(KeyRole::Public.pem_marker()) {
        return Err(VaultError::key_load(KeyRole::Public, "Invalid public key format"));
    }
    let signing_key = SigningKey::from_pkcs8_pem(private_pem.trim())
        .map_err(|e| VaultError::key_load(KeyRole::Private, e))?;
    let verifying_key = VerifyingKey::from_public_key_pem(public_pem.trim())
        .map_err(|e| VaultError::key_load(KeyRole::Public, e))?;
    if signing_key.verifying_key() != verifying_key {
        return Err(VaultError::key_load(
            KeyRole::Public,
            "public key does not match private key",
        ));
    }
    Ok(DocumentSigner::new(
        signing_key,
        verifying_key,
        fingerprint_of(public_pem),
    ))
}

/// PEM text for a freshly generated keypair.
pub struct PemKeyPair {
    pub private_pem: String,
    pub public_pem: String,
}

impl PemKeyPair {
    pub fn generate() -> Result<Self> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let private_pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| VaultError::key_load(KeyRole::Private, e))?
            .to_string();
        let public_pem = signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| VaultError::key_load(KeyRole::Public, e))?;
        Ok(Self {
            private_pem,
            public_pem,
        })
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.public_pem)
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedKeys {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub fingerprint: String,
}

/// Write a new keypair into `dir`. Existing key files are never overwritten.
pub fn generate_key_pair(dir: &Path) -> Result<GeneratedKeys> {
    write_key_pair(&dir.join(PRIVATE_KEY_FILE), &dir.join(PUBLIC_KEY_FILE))
}

/// Generate a pair and write it to exactly these paths. Neither file may
/// already exist.
pub fn write_key_pair(private_key_path: &Path, public_key_path: &Path) -> Result<GeneratedKeys> {
    for existing in [private_key_path, public_key_path] {
        if existing.exists() {
            return Err(VaultError::InvalidInput(format!(
                "refusing to overwrite existing key file {}",
                existing.display()
            )));
        }
    }
    for parent in [private_key_path, public_key_path].into_iter().filter_map(Path::parent) {
        fs::create_dir_all(parent)?;
    }
    let pair = PemKeyPair::generate()?;
    fs::write(private_key_path, &pair.private_pem)?;
    set_restricted_permissions(private_key_path)?;
    fs::write(public_key_path, &pair.public_pem)?;
    let fingerprint = pair.fingerprint();
    info!(
        fingerprint = %fingerprint,
        private_key = %private_key_path.display(),
        public_key = %public_key_path.display(),
        "generated signing keypair"
    );
    Ok(GeneratedKeys {
        private_key_path: private_key_path.to_path_buf(),
        public_key_path: public_key_path.to_path_buf(),
        fingerprint,
    })
}

#[cfg(unix)]
fn set_restricted_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600); // rw-------
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_restricted_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
