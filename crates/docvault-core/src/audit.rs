//! Audit events emitted by the document service.
//!
//! Recording is fire-and-forget from the caller's point of view: a sink that
//! fails is logged and the operation's own result stands.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::record::{DocumentId, ProtectedDocument};

pub const DOCUMENT_ENTITY: &str = "Document";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Upload,
    Download,
    DownloadVerificationFailed,
    Verify,
    Update,
    Delete,
    ReadAll,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Upload => "UPLOAD",
            AuditAction::Download => "DOWNLOAD",
            AuditAction::DownloadVerificationFailed => "DOWNLOAD_VERIFICATION_FAILED",
            AuditAction::Verify => "VERIFY",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::ReadAll => "READ_ALL",
        }
    }
}

/// Who asked, as far as the calling layer knows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = Some(role.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentDetails {
    pub file_name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_verified: Option<bool>,
}

impl DocumentDetails {
    pub fn of(record: &ProtectedDocument) -> Self {
        Self {
            file_name: record.original_name.clone(),
            mime_type: record.mime_type.clone(),
            size: None,
            signature_verified: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Failure { kind: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<DocumentId>,
    pub context: RequestContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<DocumentDetails>,
    pub outcome: AuditOutcome,
}

impl AuditEvent {
    pub fn new(action: AuditAction, context: &RequestContext) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            entity: DOCUMENT_ENTITY.to_string(),
            entity_id: None,
            context: context.clone(),
            details: None,
            outcome: AuditOutcome::Success,
        }
    }

    pub fn document(mut self, id: DocumentId) -> Self {
        self.entity_id = Some(id);
        self
    }

    pub fn details(mut self, details: DocumentDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn failed(mut self, err: &VaultError) -> Self {
        self.outcome = AuditOutcome::Failure {
            kind: err.kind().to_string(),
            reason: err.to_string(),
        };
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Success)
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Keeps events in memory, oldest first.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|e| e.action).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
