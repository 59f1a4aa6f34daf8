//! The repository: runs queries and changesets against an adapter.
//!
//! - `fetch_one` / `fetch_all`: read, decode, then preload associations
//! - `insert` / `update`: gated on changeset validity
//! - `delete`: pass-through
//! - `transaction`: all-or-nothing scope around a closure

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::association::preload_all;
use crate::{Adapter, AdapterConnection, Changeset, ConnectionConfig, Query, StorageError};

/// Executes queries and changesets against one adapter.
///
/// Operations are issued one at a time; the only batching is the single query
/// per preloaded association. Sharing a repository across concurrent callers
/// is only safe if the adapter itself is.
pub struct Repository<A> {
    adapter: A,
    transaction_open: AtomicBool,
    abandoned: AtomicBool,
}

impl<A: AdapterConnection> Repository<A> {
    /// Connect an adapter, initialize it, and wrap it in a repository.
    pub async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError> {
        let adapter = A::connect(config).await?;
        adapter.initialize().await?;
        Ok(Self::new(adapter))
    }
}

impl<A: Adapter> Repository<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            transaction_open: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn into_inner(self) -> A {
        self.adapter
    }

    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.adapter.initialize().await
    }

    pub async fn close(&self) -> Result<(), StorageError> {
        self.adapter.close().await
    }

    /// Fetch the first record matching the query, with its preloads.
    ///
    /// Returns `None` if nothing matches.
    pub async fn fetch_one<T: Send>(&self, query: Query<T>) -> Result<Option<T>, StorageError> {
        let Some(record) = self.adapter.read_one(query.criteria()).await? else {
            debug!(collection = %query.collection(), "fetch_one found nothing");
            return Ok(None);
        };

        let item = query.deserialize(&record)?;
        let mut items = preload_all(&self.adapter, query.preloads(), vec![item]).await?;
        debug!(collection = %query.collection(), "fetch_one found a record");
        Ok(items.pop())
    }

    /// Fetch every record matching the query, with its preloads.
    pub async fn fetch_all<T: Send>(&self, query: Query<T>) -> Result<Vec<T>, StorageError> {
        let records = self.adapter.read_many(query.criteria()).await?;
        let items = records
            .iter()
            .map(|record| query.deserialize(record))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            collection = %query.collection(),
            count = items.len(),
            preloads = query.preloads().len(),
            "fetch_all"
        );
        preload_all(&self.adapter, query.preloads(), items).await
    }

    /// Insert the changes of a valid changeset.
    ///
    /// Fails with [`StorageError::Validation`] without touching the adapter if
    /// the changeset has errors.
    pub async fn insert<T>(&self, changeset: Changeset<T>) -> Result<T, StorageError> {
        if !changeset.is_valid() {
            debug!(collection = %changeset.collection(), "insert rejected invalid changeset");
            return Err(changeset.to_invalid().into());
        }

        let record = self
            .adapter
            .insert(changeset.collection(), changeset.changes())
            .await?;
        debug!(collection = %changeset.collection(), "inserted record");
        changeset.deserialize(&record)
    }

    /// Apply the changes of a valid changeset to every record matching the
    /// query, returning the updated records.
    pub async fn update<T>(
        &self,
        query: Query<T>,
        changeset: Changeset<T>,
    ) -> Result<Vec<T>, StorageError> {
        if !changeset.is_valid() {
            debug!(collection = %changeset.collection(), "update rejected invalid changeset");
            return Err(changeset.to_invalid().into());
        }

        let records = self
            .adapter
            .update(query.criteria(), changeset.changes())
            .await?;
        debug!(collection = %query.collection(), count = records.len(), "updated records");

        records
            .iter()
            .map(|record| query.deserialize(record))
            .collect()
    }

    /// Delete every record matching the query, returning the count removed.
    pub async fn delete<T>(&self, query: Query<T>) -> Result<u64, StorageError> {
        let count = self.adapter.delete(query.criteria()).await?;
        debug!(collection = %query.collection(), count, "deleted records");
        Ok(count)
    }

    /// Run `body` inside a transaction.
    ///
    /// Commits when `body` succeeds. When it fails, rolls back and returns the
    /// body's error unchanged; a failing rollback is logged, never returned in
    /// its place. A failing commit is followed by a rollback and its error is
    /// returned. Transactions do not nest: calling this while one is open
    /// fails with [`StorageError::TransactionInProgress`] before the adapter is
    /// touched.
    ///
    /// If the returned future is dropped after the transaction began, the
    /// adapter is left inside it. The next call rolls that transaction back
    /// before beginning its own.
    ///
    /// ```text
    /// let user = repo
    ///     .transaction(|| async {
    ///         let user = repo.insert(user_changeset).await?;
    ///         repo.insert(profile_changeset).await?;
    ///         Ok::<_, StorageError>(user)
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<R, E, F, Fut>(&self, body: F) -> Result<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<StorageError>,
    {
        let mut guard = TransactionGuard::acquire(&self.transaction_open, &self.abandoned)
            .ok_or(StorageError::TransactionInProgress)?;

        if self.abandoned.load(Ordering::Acquire) {
            self.adapter.rollback().await.map_err(|err| {
                warn!(error = %err, "rollback of abandoned transaction failed");
                err
            })?;
            self.abandoned.store(false, Ordering::Release);
            debug!("abandoned transaction rolled back");
        }

        self.adapter.begin_transaction().await?;
        guard.began = true;
        debug!("transaction started");

        let outcome = match body().await {
            Ok(value) => match self.adapter.commit().await {
                Ok(()) => {
                    debug!("transaction committed");
                    Ok(value)
                }
                Err(commit_err) => {
                    self.rollback_after("commit failed").await;
                    Err(commit_err.into())
                }
            },
            Err(err) => {
                self.rollback_after("transaction error").await;
                Err(err)
            }
        };
        guard.finished = true;
        outcome
    }

    async fn rollback_after(&self, cause: &'static str) {
        match self.adapter.rollback().await {
            Ok(()) => debug!(cause, "transaction rolled back"),
            Err(rollback_err) => warn!(error = %rollback_err, cause, "rollback failed"),
        }
    }

    /// Whether a [`transaction`](Self::transaction) call is in progress, or
    /// one was abandoned and is still open on the adapter.
    pub fn in_transaction(&self) -> bool {
        self.transaction_open.load(Ordering::Acquire) || self.abandoned.load(Ordering::Acquire)
    }
}

/// Marks a transaction open for as long as it lives. Dropping it between
/// begin and commit or rollback flags the adapter transaction as abandoned.
struct TransactionGuard<'a> {
    open: &'a AtomicBool,
    abandoned: &'a AtomicBool,
    began: bool,
    finished: bool,
}

impl<'a> TransactionGuard<'a> {
    fn acquire(open: &'a AtomicBool, abandoned: &'a AtomicBool) -> Option<Self> {
        open.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                open,
                abandoned,
                began: false,
                finished: false,
            })
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.began && !self.finished {
            warn!("transaction dropped before commit or rollback; rolling back on next use");
            self.abandoned.store(true, Ordering::Release);
        }
        self.open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_is_exclusive_and_released_on_drop() {
        let open = AtomicBool::new(false);
        let abandoned = AtomicBool::new(false);

        let guard = TransactionGuard::acquire(&open, &abandoned).unwrap();
        assert!(TransactionGuard::acquire(&open, &abandoned).is_none());

        drop(guard);
        assert!(TransactionGuard::acquire(&open, &abandoned).is_some());
        assert!(!abandoned.load(Ordering::Acquire));
    }

    #[test]
    fn test_guard_dropped_mid_transaction_marks_abandoned() {
        let open = AtomicBool::new(false);
        let abandoned = AtomicBool::new(false);

        let mut finished = TransactionGuard::acquire(&open, &abandoned).unwrap();
        finished.began = true;
        finished.finished = true;
        drop(finished);
        assert!(!abandoned.load(Ordering::Acquire));

        let mut dropped = TransactionGuard::acquire(&open, &abandoned).unwrap();
        dropped.began = true;
        drop(dropped);
        assert!(abandoned.load(Ordering::Acquire));
        assert!(!open.load(Ordering::Acquire));
    }
}
