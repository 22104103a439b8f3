use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::VaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| VaultError::InvalidInput(format!("invalid document id format: {s}")))
    }
}

/// Identity of the uploading user, as issued by the account subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record lookup policy chosen by the calling layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    /// Only records uploaded by this owner are visible.
    Owner(OwnerId),
    /// Any record is visible (privileged callers).
    Any,
}

impl AccessScope {
    pub fn permits(&self, owner: &OwnerId) -> bool {
        match self {
            AccessScope::Owner(o) => o == owner,
            AccessScope::Any => true,
        }
    }
}

/// Cryptographic output of protecting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedArtifacts {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; 16],
    pub wrapped_key: String,
    pub content_hash: String,
    pub signature: String,
    pub signer_fingerprint: String,
}

/// Everything needed to insert a new record in one write.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner: OwnerId,
    pub original_name: String,
    pub mime_type: String,
    pub artifacts: ProtectedArtifacts,
}

/// A stored document. The cryptographic fields are write-once; only
/// `original_name` changes after creation.
///
/// Verification fields are optional so rows written without them can still
/// be read and then rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedDocument {
    pub id: DocumentId,
    pub owner: OwnerId,
    pub original_name: String,
    pub mime_type: String,
    pub ciphertext: Vec<u8>,
    pub initialization_vector: Option<Vec<u8>>,
    pub wrapped_key: Option<String>,
    pub content_hash: Option<String>,
    pub signature: Option<String>,
    pub signer_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProtectedDocument {
    pub fn from_new(id: DocumentId, doc: NewDocument, created_at: DateTime<Utc>) -> Self {
        let NewDocument {
            owner,
            original_name,
            mime_type,
            artifacts,
        } = doc;
        Self {
            id,
            owner,
            original_name,
            mime_type,
            ciphertext: artifacts.ciphertext,
            initialization_vector: Some(artifacts.iv.to_vec()),
            wrapped_key: Some(artifacts.wrapped_key),
            content_hash: Some(artifacts.content_hash),
            signature: Some(artifacts.signature),
            signer_fingerprint: Some(artifacts.signer_fingerprint),
            created_at,
        }
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id,
            owner: self.owner.clone(),
            original_name: self.original_name.clone(),
            mime_type: self.mime_type.clone(),
            content_hash: self.content_hash.clone(),
            signer_fingerprint: self.signer_fingerprint.clone(),
            created_at: self.created_at,
        }
    }
}

/// Listing view of a document: metadata only, no ciphertext or keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub owner: OwnerId,
    pub original_name: String,
    pub mime_type: String,
    pub content_hash: Option<String>,
    pub signer_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}
