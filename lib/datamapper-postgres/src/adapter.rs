//! PostgreSQL implementation of Adapter.

use async_trait::async_trait;
use datamapper::{
    Adapter, AdapterConnection, ConnectionConfig, Criteria, MigrationExecutor, Record,
    StorageError, Value,
};
use sqlx::postgres::{PgQueryResult, PgRow};
use sqlx::{Connection, PgConnection};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::row::{bind_values, row_to_record};
use crate::statement::{self, Statement};

struct Session {
    conn: Option<PgConnection>,
    in_transaction: bool,
}

/// Adapter over one PostgreSQL connection.
///
/// Statements are issued one at a time. A transaction is an explicit
/// `BEGIN` on that connection, so every statement between
/// [`begin_transaction`](Adapter::begin_transaction) and commit or rollback
/// belongs to it.
pub struct PgAdapter {
    session: Mutex<Session>,
}

impl PgAdapter {
    /// Create a new adapter from an open sqlx connection.
    pub fn new(conn: PgConnection) -> Self {
        Self {
            session: Mutex::new(Session {
                conn: Some(conn),
                in_transaction: false,
            }),
        }
    }

    /// Whether a transaction is open on the connection.
    pub async fn in_transaction(&self) -> bool {
        self.session.lock().await.in_transaction
    }

    async fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    async fn fetch_records(&self, statement: &Statement) -> Result<Vec<Record>, StorageError> {
        debug!(sql = %statement.sql, "fetch");
        let args = bind_values(&statement.args)?;

        let mut session = self.session().await;
        let rows: Vec<PgRow> = sqlx::query_with(&statement.sql, args)
            .fetch_all(session.conn()?)
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))?;

        rows.iter().map(row_to_record).collect()
    }

    async fn execute_statement(&self, statement: &Statement) -> Result<PgQueryResult, StorageError> {
        debug!(sql = %statement.sql, "execute");
        let args = bind_values(&statement.args)?;

        let mut session = self.session().await;
        sqlx::query_with(&statement.sql, args)
            .execute(session.conn()?)
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))
    }

    /// Run a transaction control statement and record the new state.
    async fn set_transaction(&self, sql: &str, open: bool) -> Result<(), StorageError> {
        let mut session = self.session().await;
        if session.in_transaction == open {
            return Err(StorageError::StorageError(if open {
                "Transaction already open".to_string()
            } else {
                "No transaction open".to_string()
            }));
        }

        let result = sqlx::query(sql).execute(session.conn()?).await;
        // A failed COMMIT or ROLLBACK still ends the transaction.
        session.in_transaction = open && result.is_ok();
        result.map_err(|e| StorageError::StorageError(e.to_string()))?;

        debug!(statement = sql, "transaction control");
        Ok(())
    }
}

impl Session {
    fn conn(&mut self) -> Result<&mut PgConnection, StorageError> {
        self.conn
            .as_mut()
            .ok_or_else(|| StorageError::StorageError("Connection is closed".to_string()))
    }
}

#[async_trait]
impl AdapterConnection for PgAdapter {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError> {
        let config = config.into();
        let conn = PgConnection::connect(config.url())
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl Adapter for PgAdapter {
    async fn initialize(&self) -> Result<(), StorageError> {
        let mut session = self.session().await;
        session
            .conn()?
            .ping()
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))
    }

    async fn close(&self) -> Result<(), StorageError> {
        let mut session = self.session().await;
        session.in_transaction = false;
        match session.conn.take() {
            Some(conn) => conn
                .close()
                .await
                .map_err(|e| StorageError::StorageError(e.to_string())),
            None => Ok(()),
        }
    }

    async fn read_one(&self, criteria: &Criteria) -> Result<Option<Record>, StorageError> {
        let mut criteria = criteria.clone();
        criteria.limit = Some(1);

        let records = self.fetch_records(&statement::select(&criteria)).await?;
        Ok(records.into_iter().next())
    }

    async fn read_many(&self, criteria: &Criteria) -> Result<Vec<Record>, StorageError> {
        self.fetch_records(&statement::select(criteria)).await
    }

    async fn insert(&self, collection: &str, changes: &Record) -> Result<Record, StorageError> {
        self.fetch_records(&statement::insert(collection, changes))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                StorageError::StorageError(format!("Insert into {} returned no row", collection))
            })
    }

    async fn update(
        &self,
        criteria: &Criteria,
        changes: &Record,
    ) -> Result<Vec<Record>, StorageError> {
        if changes.is_empty() {
            let mut criteria = criteria.clone();
            criteria.sorts.clear();
            criteria.limit = None;
            return self.read_many(&criteria).await;
        }
        self.fetch_records(&statement::update(criteria, changes)).await
    }

    async fn delete(&self, criteria: &Criteria) -> Result<u64, StorageError> {
        let result = self.execute_statement(&statement::delete(criteria)).await?;
        Ok(result.rows_affected())
    }

    async fn begin_transaction(&self) -> Result<(), StorageError> {
        self.set_transaction("BEGIN", true).await
    }

    async fn commit(&self) -> Result<(), StorageError> {
        self.set_transaction("COMMIT", false).await
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        self.set_transaction("ROLLBACK", false).await
    }
}

#[async_trait]
impl MigrationExecutor for PgAdapter {
    async fn execute(&self, statement: &str, args: &[Value]) -> Result<u64, StorageError> {
        let statement = Statement {
            sql: statement.to_string(),
            args: args.to_vec(),
        };
        let result = self.execute_statement(&statement).await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, statement: &str, args: &[Value]) -> Result<Vec<Record>, StorageError> {
        let statement = Statement {
            sql: statement.to_string(),
            args: args.to_vec(),
        };
        self.fetch_records(&statement).await
    }
}
