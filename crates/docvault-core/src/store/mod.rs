//! Persistence of protected documents.
//!
//! Cryptographic fields are written once on insert; the only mutation a store
//! offers afterwards is renaming.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::record::{AccessScope, DocumentId, DocumentSummary, NewDocument, ProtectedDocument};

/// Narrows a listing. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Case-insensitive (ASCII) substring of the stored name.
    pub name_contains: Option<String>,
    /// Inclusive lower bound on the creation time.
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the creation time.
    pub created_to: Option<DateTime<Utc>>,
}

impl ListFilter {
    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn created_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_from = from;
        self.created_to = to;
        self
    }

    pub fn matches(&self, summary: &DocumentSummary) -> bool {
        let name_ok = match self.needle() {
            Some(needle) => summary
                .original_name
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase()),
            None => true,
        };
        name_ok
            && self.created_from.map_or(true, |from| summary.created_at >= from)
            && self.created_to.map_or(true, |to| summary.created_at <= to)
    }

    /// The name needle, ignoring a blank one.
    pub(crate) fn needle(&self) -> Option<&str> {
        self.name_contains
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

pub trait DocumentStore: Send + Sync {
    /// Persist a new record in a single write, assigning id and creation time.
    fn insert(&self, doc: NewDocument) -> Result<ProtectedDocument>;

    /// `None` when the record does not exist or is outside `scope`.
    fn fetch(&self, id: &DocumentId, scope: &AccessScope) -> Result<Option<ProtectedDocument>>;

    /// Newest first.
    fn list(&self, scope: &AccessScope, filter: &ListFilter) -> Result<Vec<DocumentSummary>>;

    fn rename(
        &self,
        id: &DocumentId,
        scope: &AccessScope,
        new_name: &str,
    ) -> Result<Option<DocumentSummary>>;

    /// Returns the summary of the removed record.
    fn remove(&self, id: &DocumentId, scope: &AccessScope) -> Result<Option<DocumentSummary>>;
}
