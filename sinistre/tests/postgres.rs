//! The PostgreSQL event store. Runs against the database named by
//! `DATABASE_URL` and does nothing when it is unset.
#![cfg(feature = "postgres-storage")]

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use sqlx::PgPool;
use uuid::Uuid;

use sinistre::{
    Error, EventStore, ExpectedVersion, Metadata, PendingFact,
    declaration::{ClaimId, DeclarationSinistre},
    store::sqlx_postgres::SqlxEventStore,
};

async fn store() -> Option<SqlxEventStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("connect");
    let store = SqlxEventStore::new(pool);
    store.setup().await.expect("schema");
    Some(store)
}

fn pending(sequence: u64) -> PendingFact {
    let root = DeclarationSinistre::declare(
        ClaimId::new(2026, sequence).expect("valid claim id"),
        Some("POL-20260128-00001".parse().expect("valid contract")),
        Some(Utc::now() - Duration::days(1)),
        Metadata::new("corr-1", "agent-7"),
    )
    .expect("valid declaration");
    root.staged()[0].to_pending().expect("encode")
}

fn stream() -> String {
    format!("declaration-{}", Uuid::new_v4())
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn racing_writers_see_the_stored_version() {
    let Some(store) = store().await else {
        return;
    };
    let store = Arc::new(store);
    let stream = stream();

    let writers: Vec<_> = (0..8u64)
        .map(|i| {
            let store = store.clone();
            let stream = stream.clone();
            tokio::spawn(async move {
                store
                    .append(
                        &stream,
                        ExpectedVersion::NoStream,
                        vec![pending(2 * i + 1), pending(2 * i + 2)],
                    )
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for writer in writers {
        match writer.await.expect("join") {
            Ok(version) => {
                winners += 1;
                assert_eq!(version, 2);
            }
            Err(Error::Conflict { actual, .. }) => assert_eq!(actual, 2),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.load(&stream).await.expect("load").len(), 2);
}

#[tokio::test]
async fn appending_a_stored_fact_again_is_a_duplicate() {
    let Some(store) = store().await else {
        return;
    };
    let fact = pending(1);
    let event_id = fact.event_id;

    store
        .append(&stream(), ExpectedVersion::NoStream, vec![fact.clone()])
        .await
        .expect("first append");

    let other = stream();
    let err = store
        .append(&other, ExpectedVersion::NoStream, vec![fact])
        .await
        .expect_err("fact already stored");
    assert!(matches!(err, Error::DuplicateFact { event_id: id } if id == event_id));
    assert_eq!(err.kind(), "DUPLICATE_FACT");
    assert!(!err.is_transient());
    assert!(store.load(&other).await.expect("load").is_empty());
}
