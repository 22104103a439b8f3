use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{DocumentStore, ListFilter};
use crate::error::Result;
use crate::record::{AccessScope, DocumentId, DocumentSummary, NewDocument, ProtectedDocument};

/// Volatile store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, ProtectedDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&self, doc: NewDocument) -> Result<ProtectedDocument> {
        let record = ProtectedDocument::from_new(DocumentId::new(), doc, Utc::now());
        self.documents.write().insert(record.id, record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &DocumentId, scope: &AccessScope) -> Result<Option<ProtectedDocument>> {
        Ok(self
            .documents
            .read()
            .get(id)
            .filter(|d| scope.permits(&d.owner))
            .cloned())
    }

    fn list(&self, scope: &AccessScope, filter: &ListFilter) -> Result<Vec<DocumentSummary>> {
        let mut summaries: Vec<DocumentSummary> = self
            .documents
            .read()
            .values()
            .filter(|d| scope.permits(&d.owner))
            .map(ProtectedDocument::summary)
            .filter(|s| filter.matches(s))
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    fn rename(
        &self,
        id: &DocumentId,
        scope: &AccessScope,
        new_name: &str,
    ) -> Result<Option<DocumentSummary>> {
        let mut documents = self.documents.write();
        Ok(documents
            .get_mut(id)
            .filter(|d| scope.permits(&d.owner))
            .map(|d| {
                d.original_name = new_name.to_string();
                d.summary()
            }))
    }

    fn remove(&self, id: &DocumentId, scope: &AccessScope) -> Result<Option<DocumentSummary>> {
        let mut documents = self.documents.write();
        match documents.get(id) {
            Some(d) if scope.permits(&d.owner) => {
                Ok(documents.remove(id).map(|d| d.summary()))
            }
            _ => Ok(None),
        }
    }
}
