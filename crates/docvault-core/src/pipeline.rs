//! Document protection pipeline.
//!
//! Protect: hash and sign the plaintext, encrypt it under a fresh data key,
//! wrap the data key under the master key.
//!
//! Unprotect: unwrap, decrypt, re-hash and compare, re-verify the signature.
//! Each step is a separate type that consumes the previous one:
//!
//! ```text
//! SealedDocument -> KeyRecovered -> Decrypted -> IntegrityVerified -> Verified
//! ```
//!
//! Plaintext only leaves through [`Verified::release`], which refuses when the
//! signature did not verify.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::cipher::{self, DataKey};
use crate::digest::{digests_match, hash_bytes};
use crate::error::{Result, VaultError};
use crate::key_wrap::{unwrap_data_key, wrap_fresh_data_key, MasterKey};
use crate::keys::KeyMaterial;
use crate::record::{ProtectedArtifacts, ProtectedDocument};
use crate::signature::DocumentSigner;

pub const SIGNATURE_WARNING: &str =
    "The document content is valid but the signature verification failed";

/// Result of the verify-only entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub integrity: bool,
    pub authenticity: bool,
    pub non_repudiation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.integrity && self.authenticity && self.non_repudiation
    }
}

/// Stateless apart from the shared, read-only key material.
#[derive(Debug, Clone)]
pub struct DocumentProtectionPipeline {
    keys: Arc<KeyMaterial>,
}

impl DocumentProtectionPipeline {
    pub fn new(keys: Arc<KeyMaterial>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    pub fn protect(&self, raw: &[u8]) -> Result<ProtectedArtifacts> {
        let anchored = Anchored::over(raw, self.keys.signer())?;
        let artifacts = anchored.seal(self.keys.master());
        debug!(
            content_hash = %artifacts.content_hash,
            size = raw.len(),
            "document protected"
        );
        Ok(artifacts)
    }

    /// Verify without releasing plaintext. A signature that does not match is
    /// reported in the result; integrity and cipher failures are errors.
    pub fn verify_only(&self, record: &ProtectedDocument) -> Result<VerificationReport> {
        let verified = self.open(record)?;
        Ok(verified.report())
    }

    /// Recover plaintext for download. Any failure withholds every byte.
    pub fn unprotect_for_download(&self, record: &ProtectedDocument) -> Result<Vec<u8>> {
        self.open(record)?.release()
    }

    fn open(&self, record: &ProtectedDocument) -> Result<Verified> {
        SealedDocument::from_record(record)?
            .unwrap_key(self.keys.master())?
            .decrypt()?
            .check_integrity()?
            .check_signature(self.keys.signer())
    }
}

/// Plaintext with its digest and signature computed from the same buffer.
pub struct Anchored<'a> {
    plaintext: &'a [u8],
    content_hash: String,
    signature: String,
    signer_fingerprint: String,
}

impl<'a> Anchored<'a> {
    pub fn over(plaintext: &'a [u8], signer: &DocumentSigner) -> Result<Self> {
        if plaintext.is_empty() {
            return Err(VaultError::EmptyInput);
        }
        Ok(Self {
            plaintext,
            content_hash: hash_bytes(plaintext),
            signature: signer.sign(plaintext),
            signer_fingerprint: signer.fingerprint().to_string(),
        })
    }

    /// Encrypt under a fresh data key and wrap that key.
    pub fn seal(self, master: &MasterKey) -> ProtectedArtifacts {
        let key = DataKey::generate();
        let (ciphertext, iv) = cipher::encrypt(self.plaintext, &key);
        let wrapped_key = wrap_fresh_data_key(&key, master);
        ProtectedArtifacts {
            ciphertext,
            iv,
            wrapped_key,
            content_hash: self.content_hash,
            signature: self.signature,
            signer_fingerprint: self.signer_fingerprint,
        }
    }
}

/// A record with every verification field present.
#[derive(Debug)]
pub struct SealedDocument<'a> {
    ciphertext: &'a [u8],
    iv: &'a [u8],
    wrapped_key: &'a str,
    content_hash: &'a str,
    signature: &'a str,
}

impl<'a> SealedDocument<'a> {
    pub fn from_record(record: &'a ProtectedDocument) -> Result<Self> {
        fn present<'s>(value: &'s Option<String>) -> Option<&'s str> {
            value.as_deref().filter(|v| !v.is_empty())
        }

        let iv = record.initialization_vector.as_deref().filter(|v| !v.is_empty());
        let wrapped_key = present(&record.wrapped_key);
        let content_hash = present(&record.content_hash);
        let signature = present(&record.signature);

        let mut missing = Vec::new();
        if wrapped_key.is_none() {
            missing.push("wrapped_key");
        }
        if iv.is_none() {
            missing.push("initialization_vector");
        }
        if record.ciphertext.is_empty() {
            missing.push("ciphertext");
        }
        if content_hash.is_none() {
            missing.push("content_hash");
        }
        if signature.is_none() {
            missing.push("signature");
        }

        match (iv, wrapped_key, content_hash, signature) {
            (Some(iv), Some(wrapped_key), Some(content_hash), Some(signature))
                if missing.is_empty() =>
            {
                Ok(Self {
                    ciphertext: &record.ciphertext,
                    iv,
                    wrapped_key,
                    content_hash,
                    signature,
                })
            }
            _ => Err(VaultError::IncompleteRecord { missing }),
        }
    }

    pub fn unwrap_key(self, master: &MasterKey) -> Result<KeyRecovered<'a>> {
        let key = unwrap_data_key(self.wrapped_key, master)?;
        Ok(KeyRecovered { sealed: self, key })
    }
}

pub struct KeyRecovered<'a> {
    sealed: SealedDocument<'a>,
    key: DataKey,
}

impl<'a> KeyRecovered<'a> {
    pub fn decrypt(self) -> Result<Decrypted<'a>> {
        let plaintext = cipher::decrypt(self.sealed.ciphertext, &self.key, self.sealed.iv)?;
        Ok(Decrypted {
            content_hash: self.sealed.content_hash,
            signature: self.sealed.signature,
            plaintext: Zeroizing::new(plaintext),
        })
    }
}

pub struct Decrypted<'a> {
    content_hash: &'a str,
    signature: &'a str,
    plaintext: Zeroizing<Vec<u8>>,
}

impl<'a> Decrypted<'a> {
    pub fn check_integrity(self) -> Result<IntegrityVerified<'a>> {
        let actual = hash_bytes(&self.plaintext);
        if !digests_match(self.content_hash, &actual) {
            warn!(
                expected = %self.content_hash,
                actual = %actual,
                "content hash mismatch"
            );
            return Err(VaultError::IntegrityViolation {
                expected: self.content_hash.to_string(),
                actual,
            });
        }
        Ok(IntegrityVerified {
            signature: self.signature,
            plaintext: self.plaintext,
        })
    }
}

pub struct IntegrityVerified<'a> {
    signature: &'a str,
    plaintext: Zeroizing<Vec<u8>>,
}

impl IntegrityVerified<'_> {
    pub fn check_signature(self, signer: &DocumentSigner) -> Result<Verified> {
        let authentic = signer.verify(&self.plaintext, self.signature)?;
        if !authentic {
            warn!(fingerprint = %signer.fingerprint(), "document signature does not verify");
        }
        Ok(Verified {
            plaintext: self.plaintext,
            authentic,
        })
    }
}

/// Terminal state: integrity holds, authenticity is known.
pub struct Verified {
    plaintext: Zeroizing<Vec<u8>>,
    authentic: bool,
}

impl Verified {
    pub fn report(&self) -> VerificationReport {
        VerificationReport {
            integrity: true,
            authenticity: self.authentic,
            non_repudiation: self.authentic,
            warning: (!self.authentic).then(|| SIGNATURE_WARNING.to_string()),
        }
    }

    /// Hand the plaintext to the caller, only if the signature verified.
    pub fn release(mut self) -> Result<Vec<u8>> {
        if !self.authentic {
            return Err(VaultError::SignatureMismatch);
        }
        Ok(std::mem::take(&mut *self.plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{signer_from_pem, PemKeyPair};
    use crate::record::{DocumentId, NewDocument, OwnerId};
    use chrono::Utc;

    fn pipeline_with_secret(secret: &str) -> DocumentProtectionPipeline {
        let pair = PemKeyPair::generate().unwrap();
        let signer = signer_from_pem(&pair.private_pem, &pair.public_pem).unwrap();
        let master = MasterKey::from_secret(secret).unwrap();
        DocumentProtectionPipeline::new(Arc::new(KeyMaterial::new(master, signer)))
    }

    fn pipeline() -> DocumentProtectionPipeline {
        pipeline_with_secret("unit-test-master")
    }

    fn record_for(p: &DocumentProtectionPipeline, data: &[u8]) -> ProtectedDocument {
        let artifacts = p.protect(data).unwrap();
        ProtectedDocument::from_new(
            DocumentId::new(),
            NewDocument {
                owner: OwnerId::new("owner-1"),
                original_name: "notes.txt".into(),
                mime_type: "text/plain".into(),
                artifacts,
            },
            Utc::now(),
        )
    }

    #[test]
    fn protect_rejects_empty_input() {
        assert!(matches!(pipeline().protect(b""), Err(VaultError::EmptyInput)));
    }

    #[test]
    fn protect_anchors_plaintext() {
        let p = pipeline();
        let artifacts = p.protect(b"hello world").unwrap();
        assert_eq!(artifacts.content_hash, hash_bytes(b"hello world"));
        assert!(p.keys().signer().verify(b"hello world", &artifacts.signature).unwrap());
        assert_eq!(artifacts.signer_fingerprint, p.keys().signer().fingerprint());
        assert_ne!(artifacts.ciphertext, b"hello world".to_vec());
    }

    #[test]
    fn download_roundtrip() {
        let p = pipeline();
        let record = record_for(&p, b"hello world");
        assert_eq!(p.unprotect_for_download(&record).unwrap(), b"hello world");
        assert!(p.verify_only(&record).unwrap().is_clean());
    }

    #[test]
    fn missing_fields_are_listed() {
        let p = pipeline();
        let mut record = record_for(&p, b"data");
        record.signature = None;
        record.initialization_vector = Some(Vec::new());
        match p.unprotect_for_download(&record) {
            Err(VaultError::IncompleteRecord { missing }) => {
                assert_eq!(missing, vec!["initialization_vector", "signature"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn stored_hash_mismatch_is_integrity_violation() {
        let p = pipeline();
        let mut record = record_for(&p, b"data");
        record.content_hash = Some(hash_bytes(b"other data"));
        assert!(matches!(
            p.unprotect_for_download(&record),
            Err(VaultError::IntegrityViolation { .. })
        ));
        assert!(matches!(
            p.verify_only(&record),
            Err(VaultError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn uppercase_stored_hash_is_not_accepted() {
        let p = pipeline();
        let mut record = record_for(&p, b"data");
        record.content_hash = record.content_hash.map(|h| h.to_uppercase());
        assert!(matches!(
            p.unprotect_for_download(&record),
            Err(VaultError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn swapped_signature_blocks_release_but_reports() {
        let p = pipeline();
        let mut record = record_for(&p, b"the real content");
        record.signature = Some(p.keys().signer().sign(b"something else"));
        assert!(matches!(
            p.unprotect_for_download(&record),
            Err(VaultError::SignatureMismatch)
        ));
        let report = p.verify_only(&record).unwrap();
        assert!(report.integrity);
        assert!(!report.authenticity);
        assert!(!report.non_repudiation);
        assert_eq!(report.warning.as_deref(), Some(SIGNATURE_WARNING));
    }

    #[test]
    fn other_master_key_cannot_open() {
        let p = pipeline();
        let record = record_for(&p, b"data");
        let other = pipeline_with_secret("a different master secret");
        let err = other.unprotect_for_download(&record).unwrap_err();
        assert!(matches!(
            err,
            VaultError::Cipher(_) | VaultError::IntegrityViolation { .. }
        ));
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = VerificationReport {
            integrity: true,
            authenticity: true,
            non_repudiation: true,
            warning: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"integrity": true, "authenticity": true, "nonRepudiation": true})
        );
    }
}
