//! `sqlx` implementations of the store traits, designed for PostgreSQL.
//! Compile them with the `postgres-storage` cargo feature.
#![allow(clippy::missing_errors_doc)]

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    Error, EventStore, ExpectedVersion, PendingFact, RecordedFact, Result,
    declaration::{ClaimDocument, ClaimFilter, ClaimId, ClaimPage, InsertOutcome, ReadModelStore},
    sequence::SequenceStore,
};

/// Maps `sqlx::Error` into this crate's `Error`.
fn to_store_error(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

fn to_read_model_error(e: sqlx::Error) -> Error {
    Error::ReadModel(e.to_string())
}

/// Maps `serde_json::Error` into this crate's `Error`.
fn to_serde_error(e: serde_json::Error) -> Error {
    Error::Serialization(e.to_string())
}

/// Constraint guarding one version per stream position.
const STREAM_VERSION_CONSTRAINT: &str = "facts_pkey";
/// Constraint guarding one row per fact ID.
const FACT_ID_CONSTRAINT: &str = "facts_event_id_key";

/// Highest version stored for `stream`, 0 for an empty stream.
async fn max_version<'e, X>(executor: X, stream: &str) -> Result<i64>
where
    X: sqlx::PgExecutor<'e>,
{
    let current: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM facts WHERE stream = $1")
            .bind(stream)
            .fetch_one(executor)
            .await
            .map_err(to_store_error)?;
    Ok(current.unwrap_or(0))
}

/// A `sqlx`-backed event store for PostgreSQL.
#[derive(Debug, Clone)]
pub struct SqlxEventStore {
    pool: PgPool,
}

impl SqlxEventStore {
    /// Creates a new `SqlxEventStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures the `facts` table exists.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS facts (
                    stream TEXT NOT NULL,
                    version BIGINT NOT NULL,
                    event_id UUID NOT NULL,
                    event_type TEXT NOT NULL,
                    occurred_at TIMESTAMPTZ NOT NULL,
                    data JSONB NOT NULL,
                    CONSTRAINT facts_pkey PRIMARY KEY (stream, version),
                    CONSTRAINT facts_event_id_key UNIQUE (event_id)
                );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Explains a failed insert. A unique violation on the stream position
    /// means another writer got there first; one on the fact ID means the
    /// fact is already stored.
    async fn insert_failure(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        event_ids: &[Uuid],
        e: sqlx::Error,
    ) -> Error {
        let constraint = match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                db.constraint().map(str::to_owned)
            }
            _ => return to_store_error(e),
        };
        match constraint.as_deref() {
            Some(FACT_ID_CONSTRAINT) => {
                let stored: sqlx::Result<Option<Uuid>> = sqlx::query_scalar(
                    "SELECT event_id FROM facts WHERE event_id = ANY($1) LIMIT 1",
                )
                .bind(event_ids)
                .fetch_optional(&self.pool)
                .await;
                match stored {
                    Ok(Some(event_id)) => Error::DuplicateFact { event_id },
                    Ok(None) => to_store_error(e),
                    Err(lookup) => to_store_error(lookup),
                }
            }
            Some(STREAM_VERSION_CONSTRAINT) | None => match max_version(&self.pool, stream).await {
                Ok(actual) => Error::Conflict {
                    stream: stream.to_owned(),
                    expected,
                    actual,
                },
                Err(reread) => reread,
            },
            Some(_) => to_store_error(e),
        }
    }
}

#[async_trait::async_trait]
impl EventStore for SqlxEventStore {
    #[instrument(skip(self, facts), fields(%expected, count = facts.len()))]
    async fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        facts: Vec<PendingFact>,
    ) -> Result<i64> {
        let base = expected.base();
        let versions: Vec<i64> = (1..=facts.len() as i64).map(|i| base + i).collect();
        let event_ids: Vec<Uuid> = facts.iter().map(|f| f.event_id).collect();
        let event_types: Vec<String> = facts.iter().map(|f| f.event_type.clone()).collect();
        let occurred: Vec<DateTime<Utc>> = facts.iter().map(|f| f.occurred_at).collect();
        let data: Vec<serde_json::Value> = facts.into_iter().map(|f| f.data).collect();

        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        // Optimistic concurrency check.
        let current = max_version(&mut *tx, stream).await?;
        if !expected.matches(current) {
            return Err(Error::Conflict {
                stream: stream.to_owned(),
                expected,
                actual: current,
            });
        }
        if versions.is_empty() {
            return Ok(current);
        }

        // Bulk insert. The primary key catches writers that passed the check
        // concurrently.
        let inserted = sqlx::query(
            r#"
            INSERT INTO facts (stream, version, event_id, event_type, occurred_at, data)
            SELECT $1, v, i, t, o, d
            FROM UNNEST($2::BIGINT[], $3::UUID[], $4::TEXT[], $5::TIMESTAMPTZ[], $6::JSONB[])
                AS x(v, i, t, o, d)
            "#,
        )
        .bind(stream)
        .bind(&versions)
        .bind(&event_ids)
        .bind(&event_types)
        .bind(&occurred)
        .bind(&data)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            tx.rollback().await.map_err(to_store_error)?;
            return Err(self.insert_failure(stream, expected, &event_ids, e).await);
        }

        tx.commit().await.map_err(to_store_error)?;
        Ok(base + versions.len() as i64)
    }

    #[instrument(skip(self))]
    async fn load(&self, stream: &str) -> Result<Vec<RecordedFact>> {
        let rows: Vec<(i64, Uuid, String, DateTime<Utc>, serde_json::Value)> = sqlx::query_as(
            "SELECT version, event_id, event_type, occurred_at, data FROM facts WHERE stream = $1 ORDER BY version",
        )
        .bind(stream)
        .fetch_all(&self.pool)
        .await
        .map_err(to_store_error)?;

        Ok(rows
            .into_iter()
            .map(
                |(version, event_id, event_type, occurred_at, data)| RecordedFact {
                    stream: stream.to_owned(),
                    version,
                    event_id,
                    event_type,
                    occurred_at,
                    data,
                },
            )
            .collect())
    }
}

/// A `sqlx`-backed sequence store for PostgreSQL.
#[derive(Debug, Clone)]
pub struct SqlxSequenceStore {
    pool: PgPool,
}

impl SqlxSequenceStore {
    /// Creates a new `SqlxSequenceStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures the `sequences` table exists.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS sequences (
                    scope TEXT PRIMARY KEY,
                    value BIGINT NOT NULL
                );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SequenceStore for SqlxSequenceStore {
    #[instrument(skip(self))]
    async fn increment(&self, scope: &str) -> Result<u64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (scope, value) VALUES ($1, 1)
            ON CONFLICT (scope) DO UPDATE SET value = sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(scope)
        .fetch_one(&self.pool)
        .await
        .map_err(to_store_error)?;
        u64::try_from(value).map_err(|_| Error::Store(format!("negative sequence {scope}")))
    }
}

/// A `sqlx`-backed claim read model for PostgreSQL.
///
/// The whole document is kept as JSONB; the filtered and sorted fields are
/// also kept in their own columns.
#[derive(Debug, Clone)]
pub struct SqlxReadModelStore {
    pool: PgPool,
}

impl SqlxReadModelStore {
    /// Creates a new `SqlxReadModelStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures the `claim_documents` table exists.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS claim_documents (
                    claim_id TEXT PRIMARY KEY,
                    contract_ref TEXT NOT NULL,
                    status TEXT NOT NULL,
                    declared_at TIMESTAMPTZ NOT NULL,
                    document JSONB NOT NULL
                );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS claim_documents_declared_at ON claim_documents (declared_at DESC, claim_id DESC)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ClaimFilter) {
    builder.push(" WHERE TRUE");
    if let Some(contract_ref) = &filter.contract_ref {
        builder
            .push(" AND contract_ref = ")
            .push_bind(contract_ref.as_str().to_owned());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

#[async_trait::async_trait]
impl ReadModelStore for SqlxReadModelStore {
    #[instrument(skip(self, document), fields(claim_id = %document.claim_id))]
    async fn insert(&self, document: ClaimDocument) -> Result<InsertOutcome> {
        let json = serde_json::to_value(&document).map_err(to_serde_error)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO claim_documents (claim_id, contract_ref, status, declared_at, document)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (claim_id) DO NOTHING
            "#,
        )
        .bind(document.claim_id.as_str())
        .bind(document.contract_ref.as_str())
        .bind(document.status.as_str())
        .bind(document.declared_at)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(to_read_model_error)?
        .rows_affected();

        if inserted == 1 {
            return Ok(InsertOutcome::Inserted);
        }
        match self.get(&document.claim_id).await? {
            Some(existing) => Ok(InsertOutcome::AlreadyExists(Box::new(existing))),
            None => Err(Error::ReadModel(format!(
                "claim {} neither inserted nor found",
                document.claim_id
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, claim_id: &ClaimId) -> Result<Option<ClaimDocument>> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT document FROM claim_documents WHERE claim_id = $1")
                .bind(claim_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(to_read_model_error)?;
        row.map(|json| serde_json::from_value(json).map_err(to_serde_error))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn find(&self, filter: &ClaimFilter, limit: usize, offset: usize) -> Result<ClaimPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM claim_documents");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(to_read_model_error)?;

        let mut page = QueryBuilder::<Postgres>::new("SELECT document FROM claim_documents");
        push_filter(&mut page, filter);
        page.push(" ORDER BY declared_at DESC, claim_id DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);
        let rows: Vec<serde_json::Value> = page
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(to_read_model_error)?;

        let documents = rows
            .into_iter()
            .map(|json| serde_json::from_value(json).map_err(to_serde_error))
            .collect::<Result<Vec<_>>>()?;
        Ok(ClaimPage {
            documents,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }
}
