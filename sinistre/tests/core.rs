//! Integration tests for the event-sourcing core: stores, roots and the
//! generic repository.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sinistre::{
    Aggregate, Error, Event, EventStore, ExpectedVersion, Fact, Metadata, PendingFact, Root,
    repository::{GenericRepository, Repository, stream_name},
    store::in_memory::InMemoryEventStore,
};

/// Simple payload used for testing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Event)]
#[serde(tag = "type")]
#[event(source = "urn:sinistre:test")]
enum CounterEvent {
    Opened { label: String },
    Incremented { by: u32 },
}

/// A minimal aggregate used solely for testing store behaviour.
#[derive(Clone, Debug, Default, PartialEq)]
struct Counter {
    label: Option<String>,
    total: u32,
}

impl Aggregate for Counter {
    type Id = Uuid;
    type Event = CounterEvent;

    const CATEGORY: &'static str = "counter";

    fn apply(&mut self, fact: &Fact<CounterEvent>) {
        match fact.payload() {
            CounterEvent::Opened { label } => self.label = Some(label.clone()),
            CounterEvent::Incremented { by } => self.total += by,
        }
    }
}

type CounterRepository = GenericRepository<Counter, InMemoryEventStore>;

fn metadata() -> Metadata {
    Metadata::new("corr-1", "tester")
}

fn pending(payload: CounterEvent) -> PendingFact {
    Fact::new("counter-test", payload, metadata())
        .to_pending()
        .expect("fact should encode")
}

fn opened() -> CounterEvent {
    CounterEvent::Opened {
        label: "visits".to_owned(),
    }
}

fn setup() -> (InMemoryEventStore, Arc<CounterRepository>) {
    let store = InMemoryEventStore::default();
    let repository = Arc::new(GenericRepository::new(Arc::new(store.clone())));
    (store, repository)
}

async fn opened_counter(repository: &CounterRepository) -> Uuid {
    let id = Uuid::new_v4();
    let mut root = Root::<Counter>::new(id);
    root.record(opened(), metadata());
    repository
        .save(&mut root, &CancellationToken::new())
        .await
        .expect("initial save");
    id
}

// -- Event store ----------------------------------------------------------

#[tokio::test]
async fn in_memory_event_store_append_and_load() {
    let store = InMemoryEventStore::default();

    let version = store
        .append(
            "counter-1",
            ExpectedVersion::NoStream,
            vec![pending(opened()), pending(CounterEvent::Incremented { by: 1 })],
        )
        .await
        .expect("append should succeed");
    assert_eq!(version, 2);

    let loaded = store.load("counter-1").await.expect("load should succeed");
    let versions: Vec<i64> = loaded.iter().map(|f| f.version).collect();
    let kinds: Vec<&str> = loaded.iter().map(|f| f.event_type.as_str()).collect();
    assert_eq!(versions, vec![1, 2]);
    assert_eq!(kinds, vec!["Opened", "Incremented"]);
    assert!(loaded.iter().all(|f| f.stream == "counter-1"));
}

#[tokio::test]
async fn in_memory_event_store_conflict_writes_nothing() {
    let store = InMemoryEventStore::default();
    store
        .append("counter-1", ExpectedVersion::NoStream, vec![pending(opened())])
        .await
        .expect("initial append");

    let err = store
        .append(
            "counter-1",
            ExpectedVersion::NoStream,
            vec![pending(CounterEvent::Incremented { by: 1 })],
        )
        .await
        .expect_err("should conflict");
    assert!(matches!(err, Error::Conflict { actual: 1, .. }));

    let err = store
        .append(
            "counter-1",
            ExpectedVersion::Exact(5),
            vec![pending(CounterEvent::Incremented { by: 1 })],
        )
        .await
        .expect_err("should conflict");
    assert_eq!(err.kind(), "CONCURRENCY_CONFLICT");

    assert_eq!(store.load("counter-1").await.expect("load").len(), 1);
}

#[tokio::test]
async fn exact_version_on_missing_stream_conflicts() {
    let store = InMemoryEventStore::default();
    let err = store
        .append("counter-2", ExpectedVersion::Exact(1), vec![pending(opened())])
        .await
        .expect_err("stream does not exist");
    assert!(matches!(err, Error::Conflict { actual: 0, .. }));
    assert!(store.is_empty());
}

#[tokio::test]
async fn missing_stream_loads_empty() {
    let store = InMemoryEventStore::default();
    assert!(store.load("counter-404").await.expect("load").is_empty());
}

// -- Root -------------------------------------------------------------------

#[test]
fn staged_facts_bump_version_before_persistence() {
    let mut root = Root::<Counter>::new(Uuid::new_v4());
    root.record(opened(), metadata());
    root.record(CounterEvent::Incremented { by: 2 }, metadata());

    assert_eq!(root.version(), 2);
    assert_eq!(root.committed_version(), 0);
    assert_eq!(root.staged().len(), 2);
    assert_eq!(root.state().total, 2);
    assert_eq!(root.staged()[0].aggregate_id(), root.id().to_string());
}

#[test]
fn rehydrating_zero_facts_yields_nothing() {
    assert!(Root::<Counter>::rehydrate(Uuid::new_v4(), Vec::new()).is_none());
}

#[rstest]
#[case(ExpectedVersion::NoStream, 0, true)]
#[case(ExpectedVersion::NoStream, 1, false)]
#[case(ExpectedVersion::Exact(3), 3, true)]
#[case(ExpectedVersion::Exact(3), 2, false)]
#[case(ExpectedVersion::Exact(1), 0, false)]
fn expected_version_matching(
    #[case] expected: ExpectedVersion,
    #[case] current: i64,
    #[case] matches: bool,
) {
    assert_eq!(expected.matches(current), matches);
}

#[test]
fn expected_version_from_committed_version() {
    assert_eq!(ExpectedVersion::from_version(0), ExpectedVersion::NoStream);
    assert_eq!(ExpectedVersion::from_version(4), ExpectedVersion::Exact(4));
}

// -- Repository -------------------------------------------------------------

#[test]
fn stream_name_uses_category() {
    let id = Uuid::new_v4();
    assert_eq!(stream_name::<Counter>(&id), format!("counter-{id}"));
}

#[tokio::test]
async fn loading_unknown_aggregate_returns_none() {
    let (_, repository) = setup();
    let loaded = repository
        .load(&Uuid::new_v4(), &CancellationToken::new())
        .await
        .expect("load");
    assert!(loaded.is_none());
}

#[test_log::test(tokio::test)]
async fn save_commits_staged_facts_and_reload_matches() {
    let (store, repository) = setup();
    let token = CancellationToken::new();
    let id = Uuid::new_v4();

    let mut root = Root::<Counter>::new(id);
    root.record(opened(), metadata());
    root.record(CounterEvent::Incremented { by: 3 }, metadata());
    assert!(store.is_empty(), "recording must not persist");

    let committed = repository.save(&mut root, &token).await.expect("save");
    assert_eq!(committed.len(), 2);
    assert!(!root.has_staged());
    assert_eq!(root.committed_version(), 2);

    let reloaded = repository
        .load(&id, &token)
        .await
        .expect("load")
        .expect("aggregate exists");
    assert_eq!(reloaded.version(), 2);
    assert_eq!(reloaded.state(), root.state());
    assert!(!reloaded.has_staged());
}

#[tokio::test]
async fn save_without_staged_facts_is_a_no_op() {
    let (store, repository) = setup();
    let mut root = Root::<Counter>::new(Uuid::new_v4());
    let committed = repository
        .save(&mut root, &CancellationToken::new())
        .await
        .expect("no-op save");
    assert!(committed.is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn rehydration_is_deterministic() {
    let (_, repository) = setup();
    let token = CancellationToken::new();
    let id = opened_counter(&repository).await;

    let first = repository.load(&id, &token).await.expect("load").expect("exists");
    let second = repository.load(&id, &token).await.expect("load").expect("exists");
    assert_eq!(first.state(), second.state());
    assert_eq!(first.version(), second.version());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_from_the_same_version_admit_exactly_one() {
    const WRITERS: usize = 16;
    let (store, repository) = setup();
    let token = CancellationToken::new();
    let id = opened_counter(&repository).await;

    let mut copies = Vec::with_capacity(WRITERS);
    for _ in 0..WRITERS {
        let mut root = repository.load(&id, &token).await.expect("load").expect("exists");
        root.record(CounterEvent::Incremented { by: 1 }, metadata());
        copies.push(root);
    }

    let handles: Vec<_> = copies
        .into_iter()
        .map(|mut root| {
            let repository = Arc::clone(&repository);
            let token = token.clone();
            tokio::spawn(async move { repository.save(&mut root, &token).await })
        })
        .collect();

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("task should not panic") {
            Ok(_) => successes += 1,
            Err(Error::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(conflicts, WRITERS - 1);

    let stream = store.load(&stream_name::<Counter>(&id)).await.expect("load");
    assert_eq!(stream.len(), 2);
}

#[tokio::test]
async fn failed_save_keeps_staged_facts() {
    let (_, repository) = setup();
    let token = CancellationToken::new();
    let id = opened_counter(&repository).await;

    let mut stale = repository.load(&id, &token).await.expect("load").expect("exists");
    let mut fresh = repository.load(&id, &token).await.expect("load").expect("exists");
    fresh.record(CounterEvent::Incremented { by: 1 }, metadata());
    repository.save(&mut fresh, &token).await.expect("first writer wins");

    stale.record(CounterEvent::Incremented { by: 5 }, metadata());
    let err = repository.save(&mut stale, &token).await.expect_err("stale writer");
    assert!(matches!(err, Error::Conflict { .. }));
    assert_eq!(stale.staged().len(), 1);
}

#[tokio::test]
async fn replay_rejects_unknown_fact_kinds() {
    let (store, repository) = setup();
    let id = Uuid::new_v4();
    let mut renamed = pending(opened());
    renamed.event_type = "Renamed".to_owned();
    store
        .append(&stream_name::<Counter>(&id), ExpectedVersion::NoStream, vec![renamed])
        .await
        .expect("append");

    let err = repository
        .load(&id, &CancellationToken::new())
        .await
        .expect_err("unknown kind");
    match err {
        Error::UnknownFact { kind, version, .. } => {
            assert_eq!(kind, "Renamed");
            assert_eq!(version, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cancelled_save_persists_nothing() {
    let (store, repository) = setup();
    let token = CancellationToken::new();
    token.cancel();

    let mut root = Root::<Counter>::new(Uuid::new_v4());
    root.record(opened(), metadata());
    let err = repository.save(&mut root, &token).await.expect_err("cancelled");
    assert!(matches!(err, Error::Cancelled));
    assert!(store.is_empty());
    assert!(root.has_staged());
}

// -- Facts ----------------------------------------------------------------

#[test]
fn fact_envelope_serialises_camel_case() {
    let fact = Fact::new(
        "counter-1",
        CounterEvent::Incremented { by: 4 },
        metadata().caused_by("cmd-9"),
    );
    let json = serde_json::to_value(&fact).expect("serialise");
    assert_eq!(json["aggregateId"], "counter-1");
    assert_eq!(json["correlationId"], "corr-1");
    assert_eq!(json["causationId"], "cmd-9");
    assert_eq!(json["actorId"], "tester");
    assert_eq!(json["payload"]["type"], "Incremented");
    assert_eq!(json["payload"]["by"], 4);
}

#[test]
fn transient_errors_are_classified() {
    assert!(Error::Store("down".to_owned()).is_transient());
    assert!(Error::Broker("down".to_owned()).is_transient());
    assert!(!Error::Cancelled.is_transient());
    assert!(
        !Error::Conflict {
            stream: "s".to_owned(),
            expected: ExpectedVersion::NoStream,
            actual: 1,
        }
        .is_transient()
    );
}
