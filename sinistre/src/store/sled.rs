//! A persistent `EventStore` implementation using `sled`.

use async_trait::async_trait;
use sled::{
    Transactional,
    transaction::{ConflictableTransactionResult, TransactionError, abort},
};
use tracing::instrument;

use crate::{Error, EventStore, ExpectedVersion, PendingFact, RecordedFact, Result};

fn to_store_error(e: impl std::fmt::Display) -> Error {
    Error::Store(e.to_string())
}

/// Key of the fact at `version` of `stream`. Zero-padding keeps a stream's
/// keys in version order.
fn fact_key(stream: &str, version: i64) -> String {
    format!("{stream}/{version:020}")
}

fn decode_version(bytes: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Store("corrupt stream head".to_owned()))?;
    Ok(i64::from_be_bytes(bytes))
}

/// A persistent, thread-safe event store using `sled`.
///
/// Facts live in one tree keyed by `{stream}/{version}`; a second tree keeps
/// each stream's current version. Both are updated in one transaction, which
/// also performs the version check.
#[derive(Clone)]
pub struct SledEventStore {
    facts: sled::Tree,
    heads: sled::Tree,
}

impl SledEventStore {
    /// Creates a new `SledEventStore` on the given database.
    pub fn new(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            facts: db.open_tree("facts").map_err(to_store_error)?,
            heads: db.open_tree("stream_heads").map_err(to_store_error)?,
        })
    }
}

#[async_trait]
impl EventStore for SledEventStore {
    #[instrument(skip(self, facts), fields(%expected, count = facts.len()))]
    async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        facts: Vec<PendingFact>,
    ) -> Result<i64> {
        let base = expected.base();
        let new_version = base + facts.len() as i64;
        let rows = facts
            .into_iter()
            .zip(base + 1..)
            .map(|(fact, version)| {
                let recorded = fact.record(stream, version);
                serde_json::to_vec(&recorded)
                    .map(|value| (fact_key(stream, version), value))
                    .map_err(|e| Error::Serialization(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let outcome = (&self.facts, &self.heads).transaction(
            |(facts, heads)| -> ConflictableTransactionResult<(), Error> {
                let current = match heads.get(stream.as_bytes())? {
                    Some(bytes) => match decode_version(&bytes) {
                        Ok(version) => version,
                        Err(e) => return abort(e),
                    },
                    None => 0,
                };
                if !expected.matches(current) {
                    return abort(Error::Conflict {
                        stream: stream.to_owned(),
                        expected,
                        actual: current,
                    });
                }
                if rows.is_empty() {
                    return Ok(());
                }
                for (key, value) in &rows {
                    facts.insert(key.as_bytes(), value.as_slice())?;
                }
                heads.insert(stream.as_bytes(), new_version.to_be_bytes().to_vec())?;
                Ok(())
            },
        );

        match outcome {
            Ok(()) => Ok(new_version),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(to_store_error(e)),
        }
    }

    #[instrument(skip(self))]
    async fn load(&self, stream: &str) -> Result<Vec<RecordedFact>> {
        self.facts
            .scan_prefix(format!("{stream}/"))
            .values()
            .map(|value| {
                let value = value.map_err(to_store_error)?;
                serde_json::from_slice(&value).map_err(|e| Error::Serialization(e.to_string()))
            })
            .collect()
    }
}
