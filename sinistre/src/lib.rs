//! # Event-sourced claim declarations
//!
//! `sinistre` declares insurance claims on top of a small event-sourcing
//! core. Every claim is an aggregate whose state is folded from an
//! append-only stream of facts. Facts are appended under optimistic
//! concurrency, published to an external broker and to in-process
//! subscribers, and projected into a denormalised read model that serves
//! every query.
//!
//! ## Core Concepts
//!
//! - **[`Event`]**: the closed payload type of an aggregate's facts.
//! - **[`fact::Fact`]**: an immutable, metadata-carrying record of something
//!   that happened.
//! - **[`Aggregate`]** and **[`root::Root`]**: state folded from facts, with
//!   staged facts kept apart from committed ones.
//! - **[`EventStore`]**: append-with-expected-version and stream replay.
//! - **[`repository::Repository`]**: load-by-replay and save-staged-facts.
//! - **[`publisher::FactPublisher`]**: at-least-once delivery to a
//!   [`broker::Broker`] and to the in-process
//!   [`publisher::NotificationBus`].
//! - **[`declaration`]**: the claim declaration aggregate, its projector,
//!   query service and command service.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use sinistre::{
//!     broker::{PooledBroker, in_memory::InMemoryBroker},
//!     declaration::{
//!         self, ClaimQueries, DeclarationEvent, DeclarationProjector, DeclarationService,
//!         DeclarationSinistre, DeclareCommand,
//!     },
//!     publisher::{FactPublisher, NotificationBus},
//!     repository::GenericRepository,
//!     sequence::SequenceGenerator,
//!     store::{
//!         in_memory::InMemoryEventStore, in_memory_read_model::InMemoryReadModelStore,
//!         in_memory_sequence::InMemorySequenceStore,
//!     },
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn declare_a_claim() -> sinistre::Result<()> {
//!     let read_model = Arc::new(InMemoryReadModelStore::default());
//!     let bus = Arc::new(NotificationBus::<DeclarationEvent>::default());
//!     bus.subscribe(Arc::new(DeclarationProjector::new(read_model.clone())));
//!
//!     let broker = Arc::new(PooledBroker::new(InMemoryBroker::default()));
//!     let publisher = FactPublisher::new(broker, bus, declaration::routing_table());
//!     let repository =
//!         GenericRepository::<DeclarationSinistre, _>::new(Arc::new(InMemoryEventStore::default()));
//!     let sequences = SequenceGenerator::new(Arc::new(InMemorySequenceStore::default()));
//!     let service = DeclarationService::new(sequences, Arc::new(repository), Arc::new(publisher));
//!
//!     let declared = service
//!         .declare(
//!             DeclareCommand {
//!                 contract_ref: Some("POL-20260128-00001".to_owned()),
//!                 occurrence_date: Some(Utc::now() - Duration::days(1)),
//!                 correlation_id: "corr-1".to_owned(),
//!                 actor_id: "agent-7".to_owned(),
//!                 ..Default::default()
//!             },
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!
//!     let status = ClaimQueries::new(read_model)
//!         .get_status(declared.claim_id.as_str())
//!         .await?;
//!     assert!(status.found);
//!     Ok(())
//! }
//! ```

use std::fmt::{self, Debug, Display};

pub use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
pub use sinistre_derive::Event;
use uuid::Uuid;

extern crate self as sinistre;

pub mod broker;
pub mod cancel;
pub mod cloudevent;
pub mod declaration;
pub mod fact;
pub mod publisher;
pub mod repository;
pub mod resilience;
pub mod root;
pub mod sequence;
pub mod settings;
pub mod store;
pub mod telemetry;

pub use cloudevent::CloudEvent;
pub use declaration::DeclarationError;
pub use fact::{Fact, Metadata, PendingFact, RecordedFact};
pub use root::Root;

/// The error type for this crate.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    /// A command broke one of the declaration's business rules.
    #[error(transparent)]
    Declaration(#[from] DeclarationError),
    /// The stream was not at the version the writer expected.
    #[error("concurrency conflict on stream {stream}: expected {expected}, found version {actual}")]
    Conflict {
        /// The stream the append targeted.
        stream: String,
        /// The version the writer expected.
        expected: ExpectedVersion,
        /// The version the store actually holds.
        actual: i64,
    },
    /// A fact with this ID is already stored.
    #[error("fact {event_id} is already stored")]
    DuplicateFact {
        /// ID of the fact appended twice.
        event_id: Uuid,
    },
    /// Replay met a fact kind the aggregate's payload type does not know.
    #[error("unknown fact kind `{kind}` at version {version} of stream {stream}")]
    UnknownFact {
        /// The stream being replayed.
        stream: String,
        /// Version of the offending fact.
        version: i64,
        /// The unrecognised kind.
        kind: String,
    },
    /// Wraps an error from the underlying event or sequence store.
    #[error("event store error: {0}")]
    Store(String),
    /// Wraps an error from the read-model store.
    #[error("read model error: {0}")]
    ReadModel(String),
    /// Wraps an error from the external broker.
    #[error("broker error: {0}")]
    Broker(String),
    /// An in-process subscriber failed to handle a fact.
    #[error("subscriber error: {0}")]
    Subscriber(String),
    /// A fact or document could not be (de)serialised.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A sequence scope ran past the largest value its identifiers can hold.
    #[error("sequence {scope} exhausted at {value}")]
    SequenceExhausted {
        /// The exhausted scope.
        scope: String,
        /// The value that could not be used.
        value: u64,
    },
    /// A batch publication stopped part-way.
    #[error("published {delivered} of {total} facts: {source}")]
    BatchPublish {
        /// Number of facts fully delivered before the failure.
        delivered: usize,
        /// Number of facts in the batch.
        total: usize,
        /// The failure that stopped the batch.
        source: Box<Error>,
    },
    /// A circuit breaker rejected the call without attempting it.
    #[error("circuit open: {0}")]
    CircuitOpen(String),
    /// Settings could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Stable, upper-snake error code reported to callers of the command
    /// and query services.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Declaration(e) => e.kind(),
            Self::Conflict { .. } => "CONCURRENCY_CONFLICT",
            Self::DuplicateFact { .. } => "DUPLICATE_FACT",
            Self::UnknownFact { .. } => "UNKNOWN_FACT",
            Self::Store(_) | Self::ReadModel(_) | Self::Broker(_) | Self::Subscriber(_) => {
                "INFRASTRUCTURE_ERROR"
            }
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::SequenceExhausted { .. } => "SEQUENCE_EXHAUSTED",
            Self::BatchPublish { .. } => "PUBLISH_ERROR",
            Self::CircuitOpen(_) => "CIRCUIT_OPEN",
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(_) | Self::ReadModel(_) | Self::Broker(_) => true,
            Self::BatchPublish { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The payload type of an aggregate's facts.
///
/// Payloads are closed enums: one variant per fact kind. The `Event` derive
/// macro implements this trait from the variant names.
pub trait Event:
    Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync + 'static
{
    /// Every kind this payload type can hold. Replay rejects anything else.
    const KINDS: &'static [&'static str];

    /// Returns the kind of this fact.
    fn event_type(&self) -> &'static str;

    /// Returns the CloudEvent `source` URI associated with this payload.
    fn event_source(&self) -> &'static str;
}

/// Uniquely identifies an aggregate instance.
pub trait AggregateId:
    Eq + std::hash::Hash + Clone + Send + Sync + Debug + Display + 'static
{
    /// Creates a new, unique aggregate ID.
    fn new() -> Self;
}

impl AggregateId for Uuid {
    fn new() -> Self {
        Uuid::new_v4()
    }
}

/// An aggregate is a consistency boundary whose state is derived only by
/// folding its facts in order.
///
/// Implementations hold business state only. Versioning and the staged-fact
/// buffer live in [`Root`].
pub trait Aggregate: Default + Debug + Send + Sync + 'static {
    /// The type of the aggregate's unique identifier.
    type Id: AggregateId;
    /// The payload type of the facts this aggregate produces.
    type Event: Event;

    /// Stream category. The stream of aggregate `id` is `{CATEGORY}-{id}`.
    const CATEGORY: &'static str;

    /// Folds one fact into the state. Must be deterministic: replaying the
    /// same facts always yields the same state.
    fn apply(&mut self, fact: &Fact<Self::Event>);
}

/// The stream version an append expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist yet.
    NoStream,
    /// The stream must exist and hold exactly this many facts.
    Exact(i64),
}

impl ExpectedVersion {
    /// Maps a committed version to the expectation for the next append.
    pub fn from_version(version: i64) -> Self {
        if version <= 0 {
            Self::NoStream
        } else {
            Self::Exact(version)
        }
    }

    /// Whether a stream currently at `current` satisfies this expectation.
    pub fn matches(self, current: i64) -> bool {
        match self {
            Self::NoStream => current == 0,
            Self::Exact(version) => current == version,
        }
    }

    /// Version of the last fact already in the stream when the expectation
    /// holds.
    pub fn base(self) -> i64 {
        match self {
            Self::NoStream => 0,
            Self::Exact(version) => version,
        }
    }
}

impl Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStream => f.write_str("no stream"),
            Self::Exact(version) => write!(f, "version {version}"),
        }
    }
}

/// The trait for event stores.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends facts to a stream and returns the stream's new version.
    ///
    /// This operation must be atomic. It must fail with [`Error::Conflict`]
    /// if the stream's current version does not satisfy `expected`, in which
    /// case nothing is written.
    async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        facts: Vec<PendingFact>,
    ) -> Result<i64>;

    /// Loads the full stream, oldest fact first. An absent stream is empty.
    async fn load(&self, stream: &str) -> Result<Vec<RecordedFact>>;
}
