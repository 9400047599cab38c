//! A persistent sequence store using `sled`.

use async_trait::async_trait;
use tracing::instrument;

use crate::{Error, Result, sequence::SequenceStore};

/// Counters kept in one `sled` tree, incremented with `update_and_fetch`.
#[derive(Clone)]
pub struct SledSequenceStore {
    counters: sled::Tree,
}

impl SledSequenceStore {
    /// Creates a new `SledSequenceStore` on the given database.
    pub fn new(db: &sled::Db) -> Result<Self> {
        let counters = db
            .open_tree("sequences")
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { counters })
    }
}

fn increment(old: Option<&[u8]>) -> Option<Vec<u8>> {
    let current = old
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map_or(0, u64::from_be_bytes);
    Some((current + 1).to_be_bytes().to_vec())
}

#[async_trait]
impl SequenceStore for SledSequenceStore {
    #[instrument(skip(self))]
    async fn increment(&self, scope: &str) -> Result<u64> {
        let updated = self
            .counters
            .update_and_fetch(scope.as_bytes(), increment)
            .map_err(|e| Error::Store(e.to_string()))?
            .ok_or_else(|| Error::Store(format!("sequence {scope} vanished")))?;
        let bytes: [u8; 8] = updated
            .as_ref()
            .try_into()
            .map_err(|_| Error::Store(format!("corrupt sequence {scope}")))?;
        Ok(u64::from_be_bytes(bytes))
    }
}
