//! The storage adapter contract.
//!
//! The [`Repository`](crate::Repository) depends only on this surface. An
//! adapter receives the [`Criteria`] of a query and flat [`Record`]s of
//! changes, and translates them for its engine however it likes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{ConnectionConfig, Criteria, Record, StorageError};

/// Trait for executing queries against a storage backend.
///
/// One adapter instance is one logical session: calls are issued one at a
/// time, and transaction state lives in the adapter.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Prepare the backend for use.
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), StorageError>;

    /// Read at most one record matching the criteria.
    async fn read_one(&self, criteria: &Criteria) -> Result<Option<Record>, StorageError>;

    /// Read every record matching the criteria.
    async fn read_many(&self, criteria: &Criteria) -> Result<Vec<Record>, StorageError>;

    /// Insert a record and return it as stored (including generated fields).
    async fn insert(&self, collection: &str, changes: &Record) -> Result<Record, StorageError>;

    /// Apply changes to every matching record and return the updated records.
    async fn update(
        &self,
        criteria: &Criteria,
        changes: &Record,
    ) -> Result<Vec<Record>, StorageError>;

    /// Delete every matching record and return the number removed.
    async fn delete(&self, criteria: &Criteria) -> Result<u64, StorageError>;

    async fn begin_transaction(&self) -> Result<(), StorageError>;

    async fn commit(&self) -> Result<(), StorageError>;

    async fn rollback(&self) -> Result<(), StorageError>;
}

/// Trait for adapters that open their own connection.
#[async_trait]
pub trait AdapterConnection: Adapter + Sized {
    /// Connect to the database using the provided configuration.
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError>;
}

#[async_trait]
impl<A: Adapter + ?Sized> Adapter for Arc<A> {
    async fn initialize(&self) -> Result<(), StorageError> {
        (**self).initialize().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        (**self).close().await
    }

    async fn read_one(&self, criteria: &Criteria) -> Result<Option<Record>, StorageError> {
        (**self).read_one(criteria).await
    }

    async fn read_many(&self, criteria: &Criteria) -> Result<Vec<Record>, StorageError> {
        (**self).read_many(criteria).await
    }

    async fn insert(&self, collection: &str, changes: &Record) -> Result<Record, StorageError> {
        (**self).insert(collection, changes).await
    }

    async fn update(
        &self,
        criteria: &Criteria,
        changes: &Record,
    ) -> Result<Vec<Record>, StorageError> {
        (**self).update(criteria, changes).await
    }

    async fn delete(&self, criteria: &Criteria) -> Result<u64, StorageError> {
        (**self).delete(criteria).await
    }

    async fn begin_transaction(&self) -> Result<(), StorageError> {
        (**self).begin_transaction().await
    }

    async fn commit(&self) -> Result<(), StorageError> {
        (**self).commit().await
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        (**self).rollback().await
    }
}
