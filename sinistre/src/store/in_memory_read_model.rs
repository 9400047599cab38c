//! An in-memory claim read model.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::instrument;

use crate::{
    Result,
    declaration::{ClaimDocument, ClaimFilter, ClaimId, ClaimPage, InsertOutcome, ReadModelStore},
};

/// Claim documents keyed by claim identifier.
#[derive(Clone, Default)]
pub struct InMemoryReadModelStore {
    documents: Arc<DashMap<ClaimId, ClaimDocument>>,
}

impl InMemoryReadModelStore {
    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether no document is stored.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    #[instrument(skip(self, document), fields(claim_id = %document.claim_id))]
    async fn insert(&self, document: ClaimDocument) -> Result<InsertOutcome> {
        match self.documents.entry(document.claim_id.clone()) {
            Entry::Occupied(existing) => {
                Ok(InsertOutcome::AlreadyExists(Box::new(existing.get().clone())))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(document);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, claim_id: &ClaimId) -> Result<Option<ClaimDocument>> {
        Ok(self.documents.get(claim_id).map(|d| d.clone()))
    }

    #[instrument(skip(self))]
    async fn find(&self, filter: &ClaimFilter, limit: usize, offset: usize) -> Result<ClaimPage> {
        let documents: Vec<_> = self.documents.iter().map(|d| d.value().clone()).collect();
        Ok(filter.paginate(documents, limit, offset))
    }
}
