//! The aggregate root: business state plus versioning and staged facts.

use crate::{Aggregate, Fact, Metadata};

/// An aggregate instance together with its stream position.
///
/// `version` counts every fact applied, committed or not. Facts recorded
/// since the last load or save sit in the staged buffer until a repository
/// persists them; the buffer can only be read from outside.
#[derive(Debug, Clone)]
pub struct Root<A: Aggregate> {
    id: A::Id,
    state: A,
    version: i64,
    staged: Vec<Fact<A::Event>>,
}

impl<A: Aggregate> Root<A> {
    /// Creates an empty root, before any fact.
    pub fn new(id: A::Id) -> Self {
        Self {
            id,
            state: A::default(),
            version: 0,
            staged: Vec::new(),
        }
    }

    /// Rebuilds a root by folding committed facts in order.
    ///
    /// Returns `None` when there is nothing to fold: an aggregate without
    /// facts does not exist.
    pub fn rehydrate(id: A::Id, facts: impl IntoIterator<Item = Fact<A::Event>>) -> Option<Self> {
        let mut root = Self::new(id);
        for fact in facts {
            root.state.apply(&fact);
            root.version += 1;
        }
        (root.version > 0).then_some(root)
    }

    /// The aggregate ID.
    pub fn id(&self) -> &A::Id {
        &self.id
    }

    /// The folded business state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Number of facts applied, staged ones included.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Version of the last persisted fact.
    pub fn committed_version(&self) -> i64 {
        self.version - self.staged.len() as i64
    }

    /// Facts recorded but not yet persisted, oldest first.
    pub fn staged(&self) -> &[Fact<A::Event>] {
        &self.staged
    }

    /// Whether anything awaits persistence.
    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Records a new fact: applies it to the state and stages it.
    pub fn record(&mut self, payload: A::Event, metadata: Metadata) -> &Fact<A::Event> {
        let fact = Fact::new(&self.id, payload, metadata);
        self.push(fact)
    }

    /// Records an already-built fact. Aggregates with validated factories
    /// stage their facts through here.
    pub(crate) fn record_fact(&mut self, fact: Fact<A::Event>) -> &Fact<A::Event> {
        self.push(fact)
    }

    fn push(&mut self, fact: Fact<A::Event>) -> &Fact<A::Event> {
        self.state.apply(&fact);
        self.version += 1;
        self.staged.push(fact);
        &self.staged[self.staged.len() - 1]
    }

    /// Drains the staged buffer once its facts are persisted.
    pub(crate) fn mark_committed(&mut self) -> Vec<Fact<A::Event>> {
        std::mem::take(&mut self.staged)
    }
}
