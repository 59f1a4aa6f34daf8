//! Datamapper - a database-agnostic data-mapping core.
//!
//! Domain types stay plain structs. Everything that talks to storage goes
//! through values built by this crate and executed by a [`Repository`] over
//! an [`Adapter`].
//!
//! # Core Concepts
//!
//! - **Query**: an immutable description of a read (filters, sorts, limit,
//!   associations to preload). Builders return new queries.
//! - **Changeset**: untrusted input cast to a whitelist of fields and
//!   validated. Invalid changesets never reach the adapter.
//! - **Association**: how a parent relates to a collection of children or to
//!   the record it points at, plus the closures that attach loaded records.
//!   Preloading issues one query per association per result set.
//! - **Adapter**: the storage contract. Backends translate criteria and flat
//!   records for their engine.
//!
//! # Traits
//!
//! - [`Storable`]: domain types bound to a collection
//! - [`Adapter`] / [`AdapterConnection`]: storage backends
//! - [`Preload`]: type-erased association loading
//! - [`MigrationExecutor`]: raw statement execution for migrations
//!
//! # Features
//!
//! - `testing`: exports `MemoryAdapter`, an in-process adapter that records
//!   every operation it receives, and its `AdapterOp` log.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod adapter;
mod association;
mod changeset;
mod config;
mod error;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod migration;
mod query;
mod repository;
mod storable;
mod time;
mod value;

pub use adapter::{Adapter, AdapterConnection};
pub use association::{Association, AssociationInfo, AssociationKind, Preload};
pub use changeset::{Changeset, Errors, InvalidChangeset};
pub use config::{ConnectionConfig, DEFAULT_MIGRATIONS_TABLE, MigrationConfig};
pub use error::StorageError;
#[cfg(any(test, feature = "testing"))]
pub use memory::{AdapterOp, MemoryAdapter};
pub use migration::{Migration, MigrationAction, MigrationExecutor, MigrationFuture, MigrationRunner};
pub use query::{Criteria, Deserializer, Filter, Order, Query, Sort};
pub use repository::Repository;
pub use storable::{Storable, from_record, to_record};
pub use time::StorageDatetime;
pub use value::{Record, Value};
