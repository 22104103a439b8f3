//! Wrapping of per-document data keys under the process master key.
//!
//! Wrapped keys are AES-256-CBC/PKCS#7 ciphertexts under a fixed all-zero IV,
//! stored as standard base64. A 32-byte data key wraps to 48 bytes.

use base64::{engine::general_purpose, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::cipher::{decrypt_with_iv, encrypt_with_iv, DataKey, IV_SIZE, KEY_SIZE};
use crate::digest::hash_raw;
use crate::error::{ConfigError, Result, VaultError};

const WRAP_IV: [u8; IV_SIZE] = [0u8; IV_SIZE];

/// Length in bytes of a wrapped data key before base64 encoding.
pub const WRAPPED_KEY_LEN: usize = 48;

/// Process-wide key-encryption key, derived once from the configured secret.
/// Held in memory only.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// SHA-256 of the configured secret string.
    pub fn from_secret(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(ConfigError::MissingMasterSecret.into());
        }
        Ok(Self(hash_raw(secret.as_bytes())))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Wrap a freshly generated data key under `master`.
///
/// The IV is fixed (all zeroes). This is only acceptable because the input is
/// always a uniformly random 256-bit key that is never wrapped twice; do not
/// call this with structured or reused data.
pub fn wrap_fresh_data_key(key: &DataKey, master: &MasterKey) -> String {
    let wrapped = encrypt_with_iv(key.as_bytes(), master.as_bytes(), &WRAP_IV);
    general_purpose::STANDARD.encode(wrapped)
}

/// Recover a data key wrapped by [`wrap_fresh_data_key`].
pub fn unwrap_data_key(wrapped: &str, master: &MasterKey) -> Result<DataKey> {
    let raw = general_purpose::STANDARD
        .decode(wrapped.trim())
        .map_err(|e| VaultError::Cipher(format!("wrapped key is not valid base64: {e}")))?;
    let key_bytes = Zeroizing::new(
        decrypt_with_iv(&raw, master.as_bytes(), &WRAP_IV)
            .map_err(|_| VaultError::Cipher("unable to unwrap data key (wrong master key?)".to_string()))?,
    );
    DataKey::from_slice(&key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_roundtrip() {
        let master = MasterKey::from_secret("correct horse battery staple").unwrap();
        for _ in 0..32 {
            let key = DataKey::generate();
            let wrapped = wrap_fresh_data_key(&key, &master);
            let raw = general_purpose::STANDARD.decode(&wrapped).unwrap();
            assert_eq!(raw.len(), WRAPPED_KEY_LEN);
            let unwrapped = unwrap_data_key(&wrapped, &master).unwrap();
            assert_eq!(unwrapped.as_bytes(), key.as_bytes());
        }
    }

    #[test]
    fn wrap_is_deterministic_for_same_key() {
        let master = MasterKey::from_secret("secret").unwrap();
        let key = DataKey::from_bytes([3u8; KEY_SIZE]);
        assert_eq!(
            wrap_fresh_data_key(&key, &master),
            wrap_fresh_data_key(&key, &master)
        );
    }

    #[test]
    fn wrong_master_key_fails_or_changes_key() {
        let master = MasterKey::from_secret("one").unwrap();
        let other = MasterKey::from_secret("two").unwrap();
        let key = DataKey::generate();
        let wrapped = wrap_fresh_data_key(&key, &master);
        match unwrap_data_key(&wrapped, &other) {
            Ok(k) => assert_ne!(k.as_bytes(), key.as_bytes()),
            Err(e) => assert!(matches!(e, VaultError::Cipher(_))),
        }
    }

    #[test]
    fn rejects_invalid_encoding() {
        let master = MasterKey::from_secret("secret").unwrap();
        assert!(matches!(
            unwrap_data_key("not base64 at all!!", &master),
            Err(VaultError::Cipher(_))
        ));
        assert!(matches!(
            unwrap_data_key(&general_purpose::STANDARD.encode([0u8; 10]), &master),
            Err(VaultError::Cipher(_))
        ));
    }

    #[test]
    fn master_key_derivation() {
        let a = MasterKey::from_secret("secret").unwrap();
        let b = MasterKey::from_secret("secret").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes(), &hash_raw(b"secret"));
        assert!(matches!(
            MasterKey::from_secret(""),
            Err(VaultError::Configuration(ConfigError::MissingMasterSecret))
        ));
    }
}
