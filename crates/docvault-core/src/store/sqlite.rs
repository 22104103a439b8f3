//! SQLite-backed document store with versioned schema migrations.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::{DocumentStore, ListFilter};
use crate::error::{Result, VaultError};
use crate::record::{
    AccessScope, DocumentId, DocumentSummary, NewDocument, OwnerId, ProtectedDocument,
};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

const DOCUMENT_COLUMNS: &str = "id, owner_id, original_name, mime_type, ciphertext, iv, \
     wrapped_key, content_hash, signature, signer_fingerprint, created_at";

const SUMMARY_COLUMNS: &str =
    "id, owner_id, original_name, mime_type, content_hash, signer_fingerprint, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        debug!(path = %path.display(), "document database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;
        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        if current_version > SCHEMA_VERSION {
            return Err(VaultError::Storage(format!(
                "database schema version {current_version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        if current_version < 1 {
            Self::migrate_v1(&conn)?;
        }
        Ok(())
    }

    /// Schema version 1 - documents table
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                original_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                ciphertext BLOB NOT NULL,
                iv BLOB,
                wrapped_key TEXT,
                content_hash TEXT,
                signature TEXT,
                signer_fingerprint TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);
            CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC);

            INSERT OR REPLACE INTO schema_version (version) VALUES (1);
        "#,
        )?;
        Ok(())
    }

    fn fetch_summary(conn: &Connection, id: &DocumentId) -> Result<Option<DocumentSummary>> {
        conn.query_row(
            &format!("SELECT {SUMMARY_COLUMNS} FROM documents WHERE id = ?1"),
            params![id.to_string()],
            row_to_summary,
        )
        .optional()
        .map_err(Into::into)
    }
}

fn owner_filter(scope: &AccessScope) -> Option<&str> {
    match scope {
        AccessScope::Owner(owner) => Some(owner.as_str()),
        AccessScope::Any => None,
    }
}

/// `%needle%` with LIKE wildcards in the needle matched literally.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_id(idx: usize, raw: String) -> rusqlite::Result<DocumentId> {
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<ProtectedDocument> {
    Ok(ProtectedDocument {
        id: parse_id(0, row.get(0)?)?,
        owner: OwnerId::new(row.get::<_, String>(1)?),
        original_name: row.get(2)?,
        mime_type: row.get(3)?,
        ciphertext: row.get(4)?,
        initialization_vector: row.get(5)?,
        wrapped_key: row.get(6)?,
        content_hash: row.get(7)?,
        signature: row.get(8)?,
        signer_fingerprint: row.get(9)?,
        created_at: parse_timestamp(10, row.get(10)?)?,
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<DocumentSummary> {
    Ok(DocumentSummary {
        id: parse_id(0, row.get(0)?)?,
        owner: OwnerId::new(row.get::<_, String>(1)?),
        original_name: row.get(2)?,
        mime_type: row.get(3)?,
        content_hash: row.get(4)?,
        signer_fingerprint: row.get(5)?,
        created_at: parse_timestamp(6, row.get(6)?)?,
    })
}

impl DocumentStore for SqliteStore {
    fn insert(&self, doc: NewDocument) -> Result<ProtectedDocument> {
        let record = ProtectedDocument::from_new(DocumentId::new(), doc, Utc::now());
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO documents ({DOCUMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                record.id.to_string(),
                record.owner.as_str(),
                record.original_name,
                record.mime_type,
                record.ciphertext,
                record.initialization_vector,
                record.wrapped_key,
                record.content_hash,
                record.signature,
                record.signer_fingerprint,
                format_timestamp(&record.created_at),
            ],
        )?;
        Ok(record)
    }

    fn fetch(&self, id: &DocumentId, scope: &AccessScope) -> Result<Option<ProtectedDocument>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE id = ?1 AND (?2 IS NULL OR owner_id = ?2)"
            ),
            params![id.to_string(), owner_filter(scope)],
            row_to_document,
        )
        .optional()
        .map_err(Into::into)
    }

    fn list(&self, scope: &AccessScope, filter: &ListFilter) -> Result<Vec<DocumentSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM documents
             WHERE (?1 IS NULL OR owner_id = ?1)
               AND (?2 IS NULL OR original_name LIKE ?2 ESCAPE '\\')
               AND (?3 IS NULL OR created_at >= ?3)
               AND (?4 IS NULL OR created_at <= ?4)
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let summaries = stmt
            .query_map(
                params![
                    owner_filter(scope),
                    filter.needle().map(like_pattern),
                    filter.created_from.as_ref().map(format_timestamp),
                    filter.created_to.as_ref().map(format_timestamp),
                ],
                row_to_summary,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(summaries)
    }

    fn rename(
        &self,
        id: &DocumentId,
        scope: &AccessScope,
        new_name: &str,
    ) -> Result<Option<DocumentSummary>> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE documents SET original_name = ?3
             WHERE id = ?1 AND (?2 IS NULL OR owner_id = ?2)",
            params![id.to_string(), owner_filter(scope), new_name],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Self::fetch_summary(&conn, id)
    }

    fn remove(&self, id: &DocumentId, scope: &AccessScope) -> Result<Option<DocumentSummary>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let summary = match Self::fetch_summary(&tx, id)? {
            Some(s) if scope.permits(&s.owner) => s,
            _ => return Ok(None),
        };
        tx.execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(Some(summary))
    }
}
