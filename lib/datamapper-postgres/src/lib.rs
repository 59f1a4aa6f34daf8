//! PostgreSQL adapter for datamapper.
//!
//! [`PgAdapter`] translates query criteria and change records into
//! parameterized SQL over a single sqlx connection, and doubles as the
//! [`MigrationExecutor`](datamapper::MigrationExecutor) for running
//! migrations against the same database.
//!
//! # Usage
//!
//! ```text
//! use datamapper::{Query, Repository};
//! use datamapper_postgres::PgAdapter;
//!
//! let repo = Repository::<PgAdapter>::connect("postgres://localhost/app").await?;
//! let users = repo.fetch_all(Query::<User>::new().eq("active", true)).await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod adapter;
mod row;
mod statement;

pub use adapter::PgAdapter;
pub use row::{bind_values, row_to_record};

// Re-export core types for convenience
pub use datamapper::{
    Adapter, AdapterConnection, ConnectionConfig, Criteria, Filter, MigrationExecutor,
    MigrationRunner, Order, Record, StorageError, Value,
};
