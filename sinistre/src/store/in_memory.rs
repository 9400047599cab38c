//! An in-memory event store, useful for testing and development.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::instrument;

use crate::{Error, EventStore, ExpectedVersion, PendingFact, RecordedFact, Result};

/// Thread-safe map keyed by stream name.
type StreamMap = DashMap<String, Vec<RecordedFact>>;

/// An in-memory, thread-safe event store.
///
/// Each append holds the stream's map entry for the whole version check and
/// write, so concurrent appends to one stream are serialised.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<StreamMap>,
}

impl InMemoryEventStore {
    /// Number of streams holding at least one fact.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Whether no fact was ever appended.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

fn check(stream: &str, expected: ExpectedVersion, current: i64) -> Result<()> {
    match expected.matches(current) {
        true => Ok(()),
        false => Err(Error::Conflict {
            stream: stream.to_owned(),
            expected,
            actual: current,
        }),
    }
}

fn number(stream: &str, base: i64, facts: Vec<PendingFact>) -> Vec<RecordedFact> {
    facts
        .into_iter()
        .zip(base + 1..)
        .map(|(fact, version)| fact.record(stream, version))
        .collect()
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[instrument(skip(self, facts), fields(%expected, count = facts.len()))]
    async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        facts: Vec<PendingFact>,
    ) -> Result<i64> {
        match self.streams.entry(stream.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().last().map_or(0, |f| f.version);
                check(stream, expected, current)?;
                let recorded = number(stream, current, facts);
                occupied.get_mut().extend(recorded);
                Ok(occupied.get().last().map_or(current, |f| f.version))
            }
            Entry::Vacant(vacant) => {
                check(stream, expected, 0)?;
                if facts.is_empty() {
                    return Ok(0);
                }
                let recorded = number(stream, 0, facts);
                let version = recorded.len() as i64;
                vacant.insert(recorded);
                Ok(version)
            }
        }
    }

    #[instrument(skip(self))]
    async fn load(&self, stream: &str) -> Result<Vec<RecordedFact>> {
        Ok(self
            .streams
            .get(stream)
            .map(|facts| facts.clone())
            .unwrap_or_default())
    }
}
