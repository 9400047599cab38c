use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{ClaimDocument, ClaimFilter, ClaimId, ContractRef, DeclarationStatus, ReadModelStore};
use crate::{Result, settings::QuerySettings};

/// Page size used when a search does not give one.
pub const DEFAULT_PAGE_LIMIT: i64 = 50;
/// Largest page size a search may ask for.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Search criteria and paging, as received from callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRequest {
    /// Only claims against this contract.
    pub contract_ref: Option<String>,
    /// Only claims in this status.
    pub status: Option<String>,
    /// Page size, clamped to `1..=100`.
    pub limit: Option<i64>,
    /// Number of matches to skip; negative values count as zero.
    pub offset: Option<i64>,
}

/// Answer to a status lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    /// Whether the claim exists.
    pub found: bool,
    /// The claim's document, when found.
    pub document: Option<ClaimDocument>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Documents of this page, most recently declared first.
    pub documents: Vec<ClaimDocument>,
    /// Number of matches across all pages.
    pub total_count: u64,
    /// Page size actually applied.
    pub limit: i64,
    /// Offset actually applied.
    pub offset: i64,
}

/// Read-side queries over the claim read model. Never touches the event
/// store.
#[derive(Clone)]
pub struct ClaimQueries {
    store: Arc<dyn ReadModelStore>,
    default_limit: i64,
}

impl ClaimQueries {
    /// Creates the query service.
    pub fn new(store: Arc<dyn ReadModelStore>) -> Self {
        Self {
            store,
            default_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// Creates the query service with configured paging defaults.
    pub fn from_settings(store: Arc<dyn ReadModelStore>, settings: &QuerySettings) -> Self {
        Self {
            store,
            default_limit: clamp_limit(settings.default_limit),
        }
    }

    /// Overrides the page size used when a search does not give one.
    pub fn with_default_limit(mut self, limit: i64) -> Self {
        self.default_limit = clamp_limit(limit);
        self
    }

    /// Looks a claim up by its identifier. An identifier that is not
    /// well-formed cannot exist and is reported as not found.
    #[instrument(skip(self))]
    pub async fn get_status(&self, claim_id: &str) -> Result<StatusResult> {
        let Ok(claim_id) = claim_id.trim().parse::<ClaimId>() else {
            debug!("malformed claim identifier");
            return Ok(StatusResult {
                found: false,
                document: None,
            });
        };
        let document = self.store.get(&claim_id).await?;
        if document.is_none() {
            warn!(%claim_id, "claim not found");
        }
        Ok(StatusResult {
            found: document.is_some(),
            document,
        })
    }

    /// Searches claims, most recently declared first.
    ///
    /// `total_count` is the number of matches before paging.
    #[instrument(skip(self))]
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResult> {
        let filter = ClaimFilter {
            contract_ref: ContractRef::parse_optional(request.contract_ref.as_deref())?,
            status: match request.status.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(status) => Some(status.parse::<DeclarationStatus>()?),
            },
        };
        let limit = clamp_limit(request.limit.unwrap_or(self.default_limit));
        let offset = request.offset.unwrap_or(0).max(0);

        let page = self
            .store
            .find(&filter, limit as usize, offset as usize)
            .await?;
        debug!(returned = page.documents.len(), total = page.total, "search done");

        Ok(SearchResult {
            documents: page.documents,
            total_count: page.total,
            limit,
            offset,
        })
    }
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}
