use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    ClaimId, ContractRef, DeclarationEvent, DeclarationId, DeclarationStatus, OccurrenceDate,
    SinistreDeclare,
};
use crate::{Fact, Result};

/// Denormalised view of one claim, keyed by its claim identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDocument {
    /// Business-facing claim identifier. Unique across documents.
    pub claim_id: ClaimId,
    /// Technical identity of the declaration.
    pub declaration_id: DeclarationId,
    /// The contract the claim is made against.
    pub contract_ref: ContractRef,
    /// Day the loss occurred.
    pub occurrence_date: OccurrenceDate,
    /// When the claim was declared.
    pub declared_at: DateTime<Utc>,
    /// Current status.
    pub status: DeclarationStatus,
    /// Who declared the claim.
    pub actor_id: String,
    /// Correlation ID of the declaring command.
    pub correlation_id: String,
    /// Every fact projected into this document, oldest first.
    pub history: Vec<HistoryEntry>,
    /// When the document was first written.
    pub created_at: DateTime<Utc>,
    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
}

/// One projected fact in a document's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// ID of the projected fact.
    pub event_id: Uuid,
    /// Kind of the projected fact.
    pub event_type: String,
    /// When the fact occurred.
    pub occurred_at: DateTime<Utc>,
    /// Who caused the fact.
    pub actor_id: String,
}

impl ClaimDocument {
    /// Builds the document of a freshly declared claim, written at `now`.
    pub fn from_declared(
        fact: &Fact<DeclarationEvent>,
        declared: &SinistreDeclare,
        now: DateTime<Utc>,
    ) -> Self {
        let metadata = fact.metadata();
        Self {
            claim_id: declared.claim_id.clone(),
            declaration_id: declared.declaration_id,
            contract_ref: declared.contract_ref.clone(),
            occurrence_date: declared.occurrence_date,
            declared_at: declared.declared_at,
            status: declared.status,
            actor_id: metadata.actor_id().to_owned(),
            correlation_id: metadata.correlation_id().to_owned(),
            history: vec![HistoryEntry {
                event_id: fact.event_id(),
                event_type: fact.kind().to_owned(),
                occurred_at: fact.occurred_at(),
                actor_id: metadata.actor_id().to_owned(),
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the fact with this ID was already projected here.
    pub fn records(&self, event_id: Uuid) -> bool {
        self.history.iter().any(|entry| entry.event_id == event_id)
    }

    /// Search order: most recently declared first, ties broken by claim
    /// identifier, descending.
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.declared_at
            .cmp(&a.declared_at)
            .then_with(|| b.claim_id.cmp(&a.claim_id))
    }
}

/// Search criteria. Absent criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    /// Only claims against this contract.
    pub contract_ref: Option<ContractRef>,
    /// Only claims in this status.
    pub status: Option<DeclarationStatus>,
}

impl ClaimFilter {
    /// Whether `document` meets every criterion.
    pub fn matches(&self, document: &ClaimDocument) -> bool {
        self.contract_ref
            .as_ref()
            .is_none_or(|contract_ref| *contract_ref == document.contract_ref)
            && self.status.is_none_or(|status| status == document.status)
    }

    /// Filters, orders and pages documents held in memory.
    pub fn paginate(
        &self,
        documents: impl IntoIterator<Item = ClaimDocument>,
        limit: usize,
        offset: usize,
    ) -> ClaimPage {
        let mut matching: Vec<_> = documents.into_iter().filter(|d| self.matches(d)).collect();
        matching.sort_by(ClaimDocument::newest_first);
        let total = matching.len() as u64;
        let documents = matching.into_iter().skip(offset).take(limit).collect();
        ClaimPage { documents, total }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimPage {
    /// Documents of this page, in search order.
    pub documents: Vec<ClaimDocument>,
    /// Number of matching documents across all pages.
    pub total: u64,
}

/// Result of inserting a document.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The document was written.
    Inserted,
    /// A document with the same claim identifier exists and was left as is.
    AlreadyExists(Box<ClaimDocument>),
}

/// The trait for read-model stores.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    /// Inserts a document unless one with the same claim identifier exists.
    async fn insert(&self, document: ClaimDocument) -> Result<InsertOutcome>;

    /// Fetches the document of one claim.
    async fn get(&self, claim_id: &ClaimId) -> Result<Option<ClaimDocument>>;

    /// Returns the page of matching documents starting at `offset`, in
    /// search order, with the total number of matches.
    async fn find(&self, filter: &ClaimFilter, limit: usize, offset: usize) -> Result<ClaimPage>;
}
