//! Ed25519 document signatures.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};

use crate::error::{Result, VaultError};

/// Signing half of the document keypair together with its public key and
/// fingerprint.
#[derive(Clone)]
pub struct DocumentSigner {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    fingerprint: String,
}

impl DocumentSigner {
    pub(crate) fn new(signing_key: SigningKey, verifying_key: VerifyingKey, fingerprint: String) -> Self {
        Self {
            signing_key,
            verifying_key,
            fingerprint,
        }
    }

    /// Sign the exact byte sequence; returns base64 of the 64 signature bytes.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        BASE64.encode(signature.to_bytes())
    }

    /// Check `signature_b64` against `message`.
    ///
    /// A well-formed signature that does not match is `Ok(false)`; only an
    /// undecodable signature is an error.
    pub fn verify(&self, message: &[u8], signature_b64: &str) -> Result<bool> {
        verify_with(&self.verifying_key, message, signature_b64)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for DocumentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSigner")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

pub fn verify_with(public: &VerifyingKey, message: &[u8], signature_b64: &str) -> Result<bool> {
    let sig_bytes = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| VaultError::MalformedSignature(format!("invalid signature encoding: {e}")))?;
    let sig_bytes: [u8; SIGNATURE_LENGTH] = sig_bytes.as_slice().try_into().map_err(|_| {
        VaultError::MalformedSignature(format!(
            "signature length {} (expected {SIGNATURE_LENGTH})",
            sig_bytes.len()
        ))
    })?;
    let signature = Signature::from_bytes(&sig_bytes);
    Ok(public.verify_strict(message, &signature).is_ok())
}
