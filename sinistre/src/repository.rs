//! Provides a generic repository for interacting with aggregates.
use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{Aggregate, EventStore, ExpectedVersion, Fact, Result, Root, cancel::cancellable};

/// Defines the standard interface for a repository.
#[async_trait]
pub trait Repository<A: Aggregate>: Send + Sync {
    /// Rebuilds an aggregate by replaying its stream. Returns `Ok(None)` when
    /// the stream is empty.
    async fn load(&self, id: &A::Id, cancel: &CancellationToken) -> Result<Option<Root<A>>>;

    /// Persists the root's staged facts and returns them once committed.
    ///
    /// Saving a root with nothing staged is a no-op. On failure the staged
    /// facts stay in place.
    async fn save(&self, root: &mut Root<A>, cancel: &CancellationToken)
    -> Result<Vec<Fact<A::Event>>>;
}

/// Returns the stream name of aggregate `id`: `{CATEGORY}-{id}`.
pub fn stream_name<A: Aggregate>(id: &A::Id) -> String {
    format!("{}-{id}", A::CATEGORY)
}

/// A generic, high-level repository for loading and saving aggregates.
pub struct GenericRepository<A, S>
where
    A: Aggregate,
    S: EventStore + ?Sized,
{
    store: Arc<S>,
    _phantom: PhantomData<fn() -> A>,
}

impl<A, S> GenericRepository<A, S>
where
    A: Aggregate,
    S: EventStore + ?Sized,
{
    /// Creates a new `GenericRepository`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// The underlying event store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<A, S> Repository<A> for GenericRepository<A, S>
where
    A: Aggregate,
    S: EventStore + ?Sized + 'static,
{
    #[instrument(skip(self, cancel), fields(aggregate.id = %id))]
    async fn load(&self, id: &A::Id, cancel: &CancellationToken) -> Result<Option<Root<A>>> {
        let stream = stream_name::<A>(id);
        let recorded = cancellable(cancel, self.store.load(&stream)).await?;
        let facts = recorded
            .into_iter()
            .map(Fact::from_recorded)
            .collect::<Result<Vec<_>>>()?;
        debug!(facts = facts.len(), "replayed stream");
        Ok(Root::rehydrate(id.clone(), facts))
    }

    #[instrument(skip(self, root, cancel), fields(aggregate.id = %root.id()))]
    async fn save(
        &self,
        root: &mut Root<A>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fact<A::Event>>> {
        if !root.has_staged() {
            return Ok(Vec::new());
        }

        let stream = stream_name::<A>(root.id());
        let expected = ExpectedVersion::from_version(root.committed_version());
        let pending = root
            .staged()
            .iter()
            .map(Fact::to_pending)
            .collect::<Result<Vec<_>>>()?;

        let version = cancellable(cancel, self.store.append(&stream, expected, pending)).await?;
        debug!(%expected, version, "appended staged facts");

        Ok(root.mark_committed())
    }
}

#[async_trait]
impl<A, R> Repository<A> for Arc<R>
where
    A: Aggregate,
    R: Repository<A> + ?Sized,
{
    async fn load(&self, id: &A::Id, cancel: &CancellationToken) -> Result<Option<Root<A>>> {
        (**self).load(id, cancel).await
    }

    async fn save(
        &self,
        root: &mut Root<A>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Fact<A::Event>>> {
        (**self).save(root, cancel).await
    }
}
