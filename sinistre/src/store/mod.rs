//! The store module contains the implementations of the event, sequence and
//! read-model stores.

// The in-memory implementations are compiled when the `in-memory` feature is
// enabled (this is the default).
#[cfg(feature = "in-memory")]
/// An in-memory event store.
pub mod in_memory;

#[cfg(feature = "in-memory")]
/// An in-memory claim read model.
pub mod in_memory_read_model;

#[cfg(feature = "in-memory")]
/// An in-memory sequence store.
pub mod in_memory_sequence;

// The persistent `sled` implementations are compiled when the `sled-storage`
// feature is enabled.
#[cfg(feature = "sled-storage")]
/// A persistent event store using `sled`.
pub mod sled;

#[cfg(feature = "sled-storage")]
/// A persistent claim read model using `sled`.
pub mod sled_read_model;

#[cfg(feature = "sled-storage")]
/// A persistent sequence store using `sled`.
pub mod sled_sequence;

// SQLx / Postgres implementation compiled when the `postgres-storage` feature
// is enabled.
#[cfg(feature = "postgres-storage")]
pub mod sqlx_postgres;
