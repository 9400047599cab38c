//! An in-memory sequence store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;

use crate::{Result, sequence::SequenceStore};

/// Counters held in a concurrent map. Each increment holds the scope's
/// entry, so no two callers read the same value.
#[derive(Clone, Default)]
pub struct InMemorySequenceStore {
    counters: Arc<DashMap<String, u64>>,
}

impl InMemorySequenceStore {
    /// Current value of `scope` without incrementing it. Zero if unused.
    pub fn current(&self, scope: &str) -> u64 {
        self.counters.get(scope).map_or(0, |value| *value)
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    #[instrument(skip(self))]
    async fn increment(&self, scope: &str) -> Result<u64> {
        let mut counter = self.counters.entry(scope.to_owned()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
