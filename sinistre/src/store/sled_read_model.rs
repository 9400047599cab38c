//! A persistent claim read model using `sled`.

use async_trait::async_trait;
use tracing::instrument;

use crate::{
    Error, Result,
    declaration::{ClaimDocument, ClaimFilter, ClaimId, ClaimPage, InsertOutcome, ReadModelStore},
};

fn to_read_model_error(e: impl std::fmt::Display) -> Error {
    Error::ReadModel(e.to_string())
}

fn decode(bytes: &[u8]) -> Result<ClaimDocument> {
    serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

/// Claim documents stored as JSON, keyed by claim identifier.
///
/// Inserts use compare-and-swap against an absent key, so concurrent
/// projections of one claim leave exactly one document.
#[derive(Clone)]
pub struct SledReadModelStore {
    documents: sled::Tree,
}

impl SledReadModelStore {
    /// Creates a new `SledReadModelStore` on the given database.
    pub fn new(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            documents: db.open_tree("claim_documents").map_err(to_read_model_error)?,
        })
    }
}

#[async_trait]
impl ReadModelStore for SledReadModelStore {
    #[instrument(skip(self, document), fields(claim_id = %document.claim_id))]
    async fn insert(&self, document: ClaimDocument) -> Result<InsertOutcome> {
        let value =
            serde_json::to_vec(&document).map_err(|e| Error::Serialization(e.to_string()))?;
        let swapped = self
            .documents
            .compare_and_swap(document.claim_id.as_str(), None::<&[u8]>, Some(value))
            .map_err(to_read_model_error)?;
        match swapped {
            Ok(()) => Ok(InsertOutcome::Inserted),
            Err(conflict) => match conflict.current {
                Some(current) => Ok(InsertOutcome::AlreadyExists(Box::new(decode(&current)?))),
                None => Err(Error::ReadModel(format!(
                    "insert of claim {} lost a race with a delete",
                    document.claim_id
                ))),
            },
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, claim_id: &ClaimId) -> Result<Option<ClaimDocument>> {
        self.documents
            .get(claim_id.as_str())
            .map_err(to_read_model_error)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn find(&self, filter: &ClaimFilter, limit: usize, offset: usize) -> Result<ClaimPage> {
        let documents = self
            .documents
            .iter()
            .values()
            .map(|value| decode(&value.map_err(to_read_model_error)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(filter.paginate(documents, limit, offset))
    }
}
