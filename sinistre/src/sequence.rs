//! Gap-tolerant, strictly increasing counters per named scope.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::{Result, resilience::ResiliencePolicy};

/// The trait for sequence stores.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Atomically increments the counter of `scope` and returns the new
    /// value. A scope that does not exist yet starts at 1.
    ///
    /// Concurrent callers on the same scope never observe the same value.
    async fn increment(&self, scope: &str) -> Result<u64>;
}

/// Hands out sequence numbers from a [`SequenceStore`].
///
/// A number is consumed as soon as it is handed out: if the caller later
/// fails, the number is lost and leaves a gap.
#[derive(Clone)]
pub struct SequenceGenerator {
    store: Arc<dyn SequenceStore>,
    resilience: ResiliencePolicy,
}

impl SequenceGenerator {
    /// Creates a generator that calls the store once per request.
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self {
            store,
            resilience: ResiliencePolicy::none(),
        }
    }

    /// Wraps store calls in the given policy.
    pub fn with_resilience(mut self, resilience: ResiliencePolicy) -> Self {
        self.resilience = resilience;
        self
    }

    /// Returns the next value of `scope`.
    #[instrument(skip(self))]
    pub async fn next(&self, scope: &str) -> Result<u64> {
        let value = self.resilience.run(|| self.store.increment(scope)).await?;
        debug!(value, "allocated sequence number");
        Ok(value)
    }
}
