//! Document operations as seen by callers: protection pipeline, storage and
//! audit wired together. Every call emits exactly one audit event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::audit::{AuditAction, AuditEvent, AuditSink, DocumentDetails, RequestContext};
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::event_log::EventLog;
use crate::keys::KeyMaterial;
use crate::pipeline::{DocumentProtectionPipeline, VerificationReport};
use crate::record::{AccessScope, DocumentId, DocumentSummary, NewDocument, OwnerId, ProtectedDocument};
use crate::store::{DocumentStore, ListFilter, SqliteStore};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Service backed by the on-disk database and audit log.
pub type LocalVault = DocumentService<SqliteStore, EventLog>;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedDocument {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVerification {
    pub document_id: DocumentId,
    pub document_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub verified_at: DateTime<Utc>,
    pub verification: VerificationReport,
}

pub struct DocumentService<S, A> {
    pipeline: DocumentProtectionPipeline,
    store: S,
    audit: A,
}

impl LocalVault {
    /// Load keys, open the database and the audit log named by `config`.
    pub fn open(config: &VaultConfig) -> Result<Self> {
        let keys = Arc::new(KeyMaterial::load(config)?);
        let store = SqliteStore::open(&config.database_path)?;
        let audit = EventLog::new(
            &config.audit_log_path,
            keys.signer().clone(),
            config.audit_log_max_bytes,
        )
        .map_err(|e| VaultError::Storage(format!("{e:#}")))?;
        Ok(Self::new(DocumentProtectionPipeline::new(keys), store, audit))
    }
}

impl<S: DocumentStore, A: AuditSink> DocumentService<S, A> {
    pub fn new(pipeline: DocumentProtectionPipeline, store: S, audit: A) -> Self {
        Self {
            pipeline,
            store,
            audit,
        }
    }

    pub fn pipeline(&self) -> &DocumentProtectionPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    fn emit(&self, event: AuditEvent) {
        let action = event.action;
        if let Err(e) = self.audit.record(event) {
            warn!(action = action.as_str(), error = %e, "failed to record audit event");
        }
    }

    fn lookup(&self, id: &DocumentId, scope: &AccessScope) -> Result<ProtectedDocument> {
        self.store.fetch(id, scope)?.ok_or(VaultError::NotFound)
    }

    /// Protect and store a document owned by the requesting user.
    pub fn upload(&self, ctx: &RequestContext, req: UploadRequest) -> Result<DocumentSummary> {
        let mime_type = match req.mime_type.trim() {
            "" => DEFAULT_MIME_TYPE.to_string(),
            m => m.to_string(),
        };
        let details = DocumentDetails {
            file_name: req.file_name.clone(),
            mime_type: mime_type.clone(),
            size: Some(req.bytes.len() as u64),
            signature_verified: None,
        };
        let event = AuditEvent::new(AuditAction::Upload, ctx).details(details);

        let stored = self.pipeline.protect(&req.bytes).and_then(|artifacts| {
            self.store.insert(NewDocument {
                owner: OwnerId::new(ctx.user_id.as_str()),
                original_name: req.file_name,
                mime_type,
                artifacts,
            })
        });
        match stored {
            Ok(record) => {
                info!(
                    document_id = %record.id,
                    owner = %record.owner,
                    size = record.ciphertext.len(),
                    "document uploaded"
                );
                self.emit(event.document(record.id));
                Ok(record.summary())
            }
            Err(e) => {
                warn!(user = %ctx.user_id, error = %e, "upload failed");
                self.emit(event.failed(&e));
                Err(e)
            }
        }
    }

    /// Decrypt and fully verify a document. Nothing is returned unless every
    /// check passes.
    pub fn download(
        &self,
        ctx: &RequestContext,
        id: &DocumentId,
        scope: &AccessScope,
    ) -> Result<DownloadedDocument> {
        let event = AuditEvent::new(AuditAction::Download, ctx).document(*id);
        let record = match self.lookup(id, scope) {
            Ok(record) => record,
            Err(e) => {
                self.emit(event.failed(&e));
                return Err(e);
            }
        };
        let mut details = DocumentDetails::of(&record);

        match self.pipeline.unprotect_for_download(&record) {
            Ok(bytes) => {
                details.size = Some(bytes.len() as u64);
                details.signature_verified = Some(true);
                info!(document_id = %id, "document downloaded");
                self.emit(event.details(details));
                Ok(DownloadedDocument {
                    name: record.original_name,
                    mime_type: record.mime_type,
                    bytes,
                })
            }
            Err(e) => {
                if e.is_verification_failure() {
                    error!(document_id = %id, kind = e.kind(), error = %e, "download verification failed");
                } else {
                    warn!(document_id = %id, kind = e.kind(), error = %e, "download refused");
                }
                details.signature_verified = Some(false);
                let mut failed = event.details(details).failed(&e);
                failed.action = AuditAction::DownloadVerificationFailed;
                self.emit(failed);
                Err(e)
            }
        }
    }

    /// Run every check without releasing plaintext.
    pub fn verify(
        &self,
        ctx: &RequestContext,
        id: &DocumentId,
        scope: &AccessScope,
    ) -> Result<DocumentVerification> {
        let event = AuditEvent::new(AuditAction::Verify, ctx).document(*id);
        let outcome = self.lookup(id, scope).and_then(|record| {
            let report = self.pipeline.verify_only(&record)?;
            Ok((record, report))
        });
        match outcome {
            Ok((record, report)) => {
                let mut details = DocumentDetails::of(&record);
                details.signature_verified = Some(report.authenticity);
                let event = event.details(details);
                if report.authenticity {
                    self.emit(event);
                } else {
                    warn!(document_id = %id, "document verified with warnings");
                    self.emit(event.failed(&VaultError::SignatureMismatch));
                }
                Ok(DocumentVerification {
                    document_id: record.id,
                    document_name: record.original_name,
                    uploaded_at: record.created_at,
                    verified_at: Utc::now(),
                    verification: report,
                })
            }
            Err(e) => {
                warn!(document_id = %id, kind = e.kind(), "verification failed");
                self.emit(event.failed(&e));
                Err(e)
            }
        }
    }

    pub fn list(
        &self,
        ctx: &RequestContext,
        scope: &AccessScope,
        filter: &ListFilter,
    ) -> Result<Vec<DocumentSummary>> {
        let event = AuditEvent::new(AuditAction::ReadAll, ctx);
        match self.store.list(scope, filter) {
            Ok(documents) => {
                self.emit(event);
                Ok(documents)
            }
            Err(e) => {
                self.emit(event.failed(&e));
                Err(e)
            }
        }
    }

    /// Change the display name. The name is trimmed and must not be empty.
    pub fn rename(
        &self,
        ctx: &RequestContext,
        id: &DocumentId,
        scope: &AccessScope,
        new_name: &str,
    ) -> Result<DocumentSummary> {
        let event = AuditEvent::new(AuditAction::Update, ctx).document(*id);
        let new_name = new_name.trim();
        let renamed = if new_name.is_empty() {
            Err(VaultError::InvalidInput("document name must not be empty".into()))
        } else {
            self.store
                .rename(id, scope, new_name)
                .and_then(|s| s.ok_or(VaultError::NotFound))
        };
        match renamed {
            Ok(summary) => {
                self.emit(event.details(DocumentDetails {
                    file_name: summary.original_name.clone(),
                    mime_type: summary.mime_type.clone(),
                    size: None,
                    signature_verified: None,
                }));
                Ok(summary)
            }
            Err(e) => {
                self.emit(event.failed(&e));
                Err(e)
            }
        }
    }

    pub fn delete(
        &self,
        ctx: &RequestContext,
        id: &DocumentId,
        scope: &AccessScope,
    ) -> Result<DocumentSummary> {
        let event = AuditEvent::new(AuditAction::Delete, ctx).document(*id);
        match self
            .store
            .remove(id, scope)
            .and_then(|s| s.ok_or(VaultError::NotFound))
        {
            Ok(summary) => {
                info!(document_id = %id, "document deleted");
                self.emit(event.details(DocumentDetails {
                    file_name: summary.original_name.clone(),
                    mime_type: summary.mime_type.clone(),
                    size: None,
                    signature_verified: None,
                }));
                Ok(summary)
            }
            Err(e) => {
                self.emit(event.failed(&e));
                Err(e)
            }
        }
    }
}
