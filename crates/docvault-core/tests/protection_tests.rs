//! End-to-end tests for document protection.
//!
//! Tests cover:
//!  1. Clean upload → download
//!  2. Corrupted ciphertext in the database
//!  3. Verify-only on a valid document
//!  4. Verify-only with a swapped signature
//!  5. Single-byte tampering anywhere in ciphertext or IV
//!  6. Concurrent requests sharing one key set
//!  7. On-disk vault with signed audit log

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use docvault_core::audit::{AuditAction, AuditOutcome, MemoryAuditSink, RequestContext};
use docvault_core::config::VaultConfig;
use docvault_core::key_wrap::MasterKey;
use docvault_core::keys::{generate_key_pair, signer_from_pem, KeyMaterial, PemKeyPair};
use docvault_core::pipeline::{DocumentProtectionPipeline, SIGNATURE_WARNING};
use docvault_core::record::{AccessScope, DocumentId, NewDocument, OwnerId, ProtectedDocument};
use docvault_core::service::{DocumentService, LocalVault, UploadRequest};
use docvault_core::store::{DocumentStore, ListFilter, MemoryStore, SqliteStore};
use docvault_core::VaultError;
use rusqlite::{params, Connection};
use tempfile::{tempdir, TempDir};
use zeroize::Zeroizing;

fn key_material() -> Arc<KeyMaterial> {
    let pair = PemKeyPair::generate().unwrap();
    let signer = signer_from_pem(&pair.private_pem, &pair.public_pem).unwrap();
    Arc::new(KeyMaterial::new(
        MasterKey::from_secret("integration-master-secret").unwrap(),
        signer,
    ))
}

/// Service over a database file, plus the path so tests can tamper with rows.
fn sqlite_service() -> (TempDir, std::path::PathBuf, DocumentService<SqliteStore, MemoryAuditSink>) {
    let dir = tempdir().unwrap();
    let db = dir.path().join("documents.db");
    let svc = DocumentService::new(
        DocumentProtectionPipeline::new(key_material()),
        SqliteStore::open(&db).unwrap(),
        MemoryAuditSink::new(),
    );
    (dir, db, svc)
}

fn upload_hello<S: DocumentStore>(svc: &DocumentService<S, MemoryAuditSink>) -> DocumentId {
    svc.upload(
        &RequestContext::new("alice"),
        UploadRequest {
            file_name: "hello.txt".into(),
            mime_type: "text/plain".into(),
            bytes: b"hello world".to_vec(),
        },
    )
    .unwrap()
    .id
}

fn protected_record(p: &DocumentProtectionPipeline, data: &[u8]) -> ProtectedDocument {
    ProtectedDocument::from_new(
        DocumentId::new(),
        NewDocument {
            owner: OwnerId::new("alice"),
            original_name: "data.bin".into(),
            mime_type: "application/octet-stream".into(),
            artifacts: p.protect(data).unwrap(),
        },
        chrono::Utc::now(),
    )
}

// ─── Test 1: Clean upload → download ────────────────────────────────────────

#[test]
fn test_clean_upload_and_download() {
    let (_dir, _db, svc) = sqlite_service();
    let id = upload_hello(&svc);

    let record = svc.store().fetch(&id, &AccessScope::Any).unwrap().unwrap();
    assert_eq!(record.content_hash.as_deref().map(str::len), Some(64));
    assert!(!record.signature.as_deref().unwrap_or_default().is_empty());
    assert_ne!(record.ciphertext, b"hello world".to_vec());

    let doc = svc
        .download(&RequestContext::new("alice"), &id, &AccessScope::Owner(OwnerId::new("alice")))
        .unwrap();
    assert_eq!(doc.bytes, b"hello world");
    assert_eq!(
        svc.audit().actions(),
        vec![AuditAction::Upload, AuditAction::Download]
    );
}

// ─── Test 2: Corrupted ciphertext ───────────────────────────────────────────

#[test]
fn test_corrupted_ciphertext_withholds_plaintext() {
    let (_dir, db, svc) = sqlite_service();
    let id = upload_hello(&svc);

    let conn = Connection::open(&db).unwrap();
    let mut ciphertext: Vec<u8> = conn
        .query_row(
            "SELECT ciphertext FROM documents WHERE id = ?1",
            params![id.to_string()],
            |r| r.get(0),
        )
        .unwrap();
    ciphertext[0] ^= 0xFF;
    conn.execute(
        "UPDATE documents SET ciphertext = ?1 WHERE id = ?2",
        params![ciphertext, id.to_string()],
    )
    .unwrap();

    let err = svc
        .download(&RequestContext::new("alice"), &id, &AccessScope::Any)
        .unwrap_err();
    assert!(
        matches!(err, VaultError::IntegrityViolation { .. } | VaultError::Cipher(_)),
        "unexpected error: {err}"
    );
    let events = svc.audit().events();
    let last = events.last().unwrap();
    assert_eq!(last.action, AuditAction::DownloadVerificationFailed);
    assert!(!last.is_success());
}

// ─── Test 3: Verify-only, valid document ────────────────────────────────────

#[test]
fn test_verify_only_valid_document() {
    let (_dir, _db, svc) = sqlite_service();
    let id = upload_hello(&svc);
    let result = svc
        .verify(&RequestContext::new("auditor"), &id, &AccessScope::Any)
        .unwrap();
    let report = result.verification;
    assert!(report.integrity && report.authenticity && report.non_repudiation);
    assert!(report.warning.is_none());
}

// ─── Test 4: Verify-only, swapped signature ─────────────────────────────────

#[test]
fn test_swapped_signature_is_reported_not_thrown() {
    let (_dir, db, svc) = sqlite_service();
    let id = upload_hello(&svc);
    let forged = svc.pipeline().keys().signer().sign(b"different content");
    Connection::open(&db)
        .unwrap()
        .execute(
            "UPDATE documents SET signature = ?1 WHERE id = ?2",
            params![forged, id.to_string()],
        )
        .unwrap();

    let ctx = RequestContext::new("alice");
    let report = svc.verify(&ctx, &id, &AccessScope::Any).unwrap().verification;
    assert!(report.integrity);
    assert!(!report.authenticity);
    assert!(!report.non_repudiation);
    assert_eq!(report.warning.as_deref(), Some(SIGNATURE_WARNING));

    let verified = svc.audit().events().pop().unwrap();
    assert_eq!(verified.action, AuditAction::Verify);
    assert!(matches!(
        verified.outcome,
        AuditOutcome::Failure { ref kind, .. } if kind == "SIGNATURE_MISMATCH"
    ));
    assert_eq!(verified.details.unwrap().signature_verified, Some(false));

    // The download path refuses to release the same record.
    assert!(matches!(
        svc.download(&ctx, &id, &AccessScope::Any),
        Err(VaultError::SignatureMismatch)
    ));
    assert_eq!(
        svc.audit().actions().last(),
        Some(&AuditAction::DownloadVerificationFailed)
    );
}

#[test]
fn test_garbage_signature_is_an_error_on_both_paths() {
    let (_dir, db, svc) = sqlite_service();
    let id = upload_hello(&svc);
    Connection::open(&db)
        .unwrap()
        .execute(
            "UPDATE documents SET signature = 'not base64!' WHERE id = ?1",
            params![id.to_string()],
        )
        .unwrap();
    let ctx = RequestContext::new("alice");
    assert!(matches!(
        svc.verify(&ctx, &id, &AccessScope::Any),
        Err(VaultError::MalformedSignature(_))
    ));
    assert!(matches!(
        svc.download(&ctx, &id, &AccessScope::Any),
        Err(VaultError::MalformedSignature(_))
    ));
}

#[test]
fn test_row_without_wrapped_key_is_incomplete() {
    let (_dir, db, svc) = sqlite_service();
    let id = upload_hello(&svc);
    Connection::open(&db)
        .unwrap()
        .execute(
            "UPDATE documents SET wrapped_key = NULL WHERE id = ?1",
            params![id.to_string()],
        )
        .unwrap();
    match svc.download(&RequestContext::new("alice"), &id, &AccessScope::Any) {
        Err(VaultError::IncompleteRecord { missing }) => assert_eq!(missing, vec!["wrapped_key"]),
        other => panic!("unexpected: {other:?}"),
    }
}

// ─── Test 5: Single-byte tampering ──────────────────────────────────────────

#[test]
fn test_any_single_byte_flip_is_detected() {
    let pipeline = DocumentProtectionPipeline::new(key_material());
    let plaintext: Vec<u8> = (0..100u8).collect();
    let record = protected_record(&pipeline, &plaintext);
    assert_eq!(pipeline.unprotect_for_download(&record).unwrap(), plaintext);

    for pos in 0..record.ciphertext.len() {
        let mut tampered = record.clone();
        tampered.ciphertext[pos] ^= 0x01;
        let err = pipeline.unprotect_for_download(&tampered).unwrap_err();
        assert!(
            matches!(err, VaultError::IntegrityViolation { .. } | VaultError::Cipher(_)),
            "byte {pos}: unexpected error {err}"
        );
    }

    for pos in 0..16 {
        let mut tampered = record.clone();
        if let Some(iv) = tampered.initialization_vector.as_mut() {
            iv[pos] ^= 0x80;
        }
        assert!(matches!(
            pipeline.unprotect_for_download(&tampered),
            Err(VaultError::IntegrityViolation { .. })
        ));
    }
}

#[test]
fn test_truncated_or_bad_key_material_is_a_cipher_error() {
    let pipeline = DocumentProtectionPipeline::new(key_material());
    let record = protected_record(&pipeline, b"some document body");

    let mut truncated = record.clone();
    truncated.ciphertext.pop();
    assert!(matches!(
        pipeline.unprotect_for_download(&truncated),
        Err(VaultError::Cipher(_))
    ));

    let mut short_iv = record.clone();
    short_iv.initialization_vector = Some(vec![0u8; 8]);
    assert!(matches!(
        pipeline.unprotect_for_download(&short_iv),
        Err(VaultError::Cipher(_))
    ));

    let mut bad_wrap = record;
    bad_wrap.wrapped_key = Some("AAAA".into());
    assert!(matches!(
        pipeline.unprotect_for_download(&bad_wrap),
        Err(VaultError::Cipher(_))
    ));
}

// ─── Test 6: Concurrency ────────────────────────────────────────────────────

#[test]
fn test_concurrent_requests_share_keys() {
    let svc = Arc::new(DocumentService::new(
        DocumentProtectionPipeline::new(key_material()),
        MemoryStore::new(),
        MemoryAuditSink::new(),
    ));
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                let ctx = RequestContext::new(format!("user-{worker}"));
                let scope = AccessScope::Owner(OwnerId::new(ctx.user_id.clone()));
                for round in 0..10 {
                    let body = format!("worker {worker} round {round}").into_bytes();
                    let summary = svc
                        .upload(
                            &ctx,
                            UploadRequest {
                                file_name: format!("{worker}-{round}.txt"),
                                mime_type: "text/plain".into(),
                                bytes: body.clone(),
                            },
                        )
                        .unwrap();
                    let doc = svc.download(&ctx, &summary.id, &scope).unwrap();
                    assert_eq!(doc.bytes, body);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(svc.audit().len(), 8 * 10 * 2);
    let stored = svc
        .store()
        .list(&AccessScope::Any, &ListFilter::default())
        .unwrap();
    assert_eq!(stored.len(), 80);
}

// ─── Test 7: On-disk vault ──────────────────────────────────────────────────

fn on_disk_config(dir: &std::path::Path) -> VaultConfig {
    let mut config = VaultConfig::for_data_dir(dir);
    config.master_secret = Some(Zeroizing::new("on-disk-secret".to_string()));
    generate_key_pair(config.private_key_path.parent().unwrap()).unwrap();
    config
}

#[test]
fn test_local_vault_persists_and_audits() {
    let dir = tempdir().unwrap();
    let config = on_disk_config(dir.path());
    let ctx = RequestContext::new("alice");

    let id = {
        let vault = LocalVault::open(&config).unwrap();
        vault
            .upload(
                &ctx,
                UploadRequest {
                    file_name: "minutes.md".into(),
                    mime_type: "text/markdown".into(),
                    bytes: b"# Minutes".to_vec(),
                },
            )
            .unwrap()
            .id
    };

    let vault = LocalVault::open(&config).unwrap();
    let doc = vault.download(&ctx, &id, &AccessScope::Any).unwrap();
    assert_eq!(doc.bytes, b"# Minutes");

    let recent = vault.audit().read_recent(None, None).unwrap();
    let actions: Vec<_> = recent.iter().map(|e| e.event.action).collect();
    assert_eq!(actions, vec![AuditAction::Download, AuditAction::Upload]);
    assert!(vault.audit().verify_chain().unwrap().is_intact());
}

#[test]
fn test_torn_audit_line_does_not_lock_the_vault() {
    let dir = tempdir().unwrap();
    let config = on_disk_config(dir.path());
    let ctx = RequestContext::new("alice");
    let id = {
        let vault = LocalVault::open(&config).unwrap();
        vault
            .upload(
                &ctx,
                UploadRequest {
                    file_name: "ledger.csv".into(),
                    mime_type: "text/csv".into(),
                    bytes: b"a,b\n1,2\n".to_vec(),
                },
            )
            .unwrap()
            .id
    };
    let mut log = OpenOptions::new()
        .append(true)
        .open(&config.audit_log_path)
        .unwrap();
    log.write_all(br#"{"seq":2,"timest"#).unwrap();
    drop(log);

    let vault = LocalVault::open(&config).unwrap();
    let doc = vault.download(&ctx, &id, &AccessScope::Any).unwrap();
    assert_eq!(doc.bytes, b"a,b\n1,2\n");

    let report = vault.audit().verify_chain().unwrap();
    assert_eq!(report.entries, 1);
    assert_eq!(report.broken.map(|b| b.line), Some(2));
}

#[test]
fn test_wrong_master_secret_cannot_read_existing_documents() {
    let dir = tempdir().unwrap();
    let mut config = on_disk_config(dir.path());
    let ctx = RequestContext::new("alice");
    let id = upload_hello(&DocumentService::new(
        DocumentProtectionPipeline::new(Arc::new(KeyMaterial::load(&config).unwrap())),
        SqliteStore::open(&config.database_path).unwrap(),
        MemoryAuditSink::new(),
    ));

    config.master_secret = Some(Zeroizing::new("rotated-without-rewrap".to_string()));
    let vault = LocalVault::open(&config).unwrap();
    let err = vault.download(&ctx, &id, &AccessScope::Any).unwrap_err();
    assert!(matches!(
        err,
        VaultError::Cipher(_) | VaultError::IntegrityViolation { .. }
    ));
    assert!(!err.is_fatal_to_process());
}

#[test]
fn test_missing_keys_are_fatal_configuration_errors() {
    let dir = tempdir().unwrap();
    let mut config = VaultConfig::for_data_dir(dir.path());
    config.master_secret = Some(Zeroizing::new("secret".to_string()));
    let err = LocalVault::open(&config).err().unwrap();
    assert!(err.is_fatal_to_process());
    assert!(err.to_string().contains("private key"));
}
