//! Versioned migrations and the runner that tracks them.
//!
//! Applied versions are recorded in a tracking table (see
//! [`MigrationConfig`]). A run applies every migration newer than the highest
//! recorded version, in ascending version order, whatever order the input
//! list is in.
//!
//! Migrations are identified by `(version, name)` only. A migration whose body
//! changes but keeps its version and name is treated as already applied.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::{MigrationConfig, Record, StorageDatetime, StorageError, Value};

/// Executes raw statements on behalf of migrations and the runner.
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Execute a statement and return the number of rows affected.
    async fn execute(&self, statement: &str, args: &[Value]) -> Result<u64, StorageError>;

    /// Execute a statement and return the rows it produces.
    async fn query(&self, statement: &str, args: &[Value]) -> Result<Vec<Record>, StorageError>;
}

/// The future returned by a migration action.
pub type MigrationFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>>;

/// A forward or reverse migration step.
pub type MigrationAction =
    Arc<dyn for<'a> Fn(&'a dyn MigrationExecutor) -> MigrationFuture<'a> + Send + Sync>;

/// One versioned schema change.
#[derive(Clone)]
pub struct Migration {
    version: u64,
    name: String,
    up: MigrationAction,
    down: Option<MigrationAction>,
}

impl Migration {
    /// A migration with a forward action and no reverse action.
    pub fn new(
        version: u64,
        name: impl Into<String>,
        up: impl for<'a> Fn(&'a dyn MigrationExecutor) -> MigrationFuture<'a> + Send + Sync + 'static,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            up: Arc::new(up),
            down: None,
        }
    }

    /// Attach a reverse action.
    pub fn with_down(
        mut self,
        down: impl for<'a> Fn(&'a dyn MigrationExecutor) -> MigrationFuture<'a>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.down = Some(Arc::new(down));
        self
    }

    /// A migration that executes one statement forward and, optionally, one
    /// in reverse.
    pub fn sql(
        version: u64,
        name: impl Into<String>,
        up: impl Into<String>,
        down: Option<&str>,
    ) -> Self {
        let up = up.into();
        let migration = Self::new(version, name, move |executor| {
            let statement = up.clone();
            Box::pin(async move { executor.execute(&statement, &[]).await.map(|_| ()) })
        });

        match down.map(str::to_string) {
            Some(down) => migration.with_down(move |executor| {
                let statement = down.clone();
                Box::pin(async move { executor.execute(&statement, &[]).await.map(|_| ()) })
            }),
            None => migration,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a reverse action was supplied.
    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    /// Run the forward action.
    pub async fn up(&self, executor: &dyn MigrationExecutor) -> Result<(), StorageError> {
        (self.up)(executor).await
    }

    /// Run the reverse action. Does nothing for irreversible migrations.
    pub async fn down(&self, executor: &dyn MigrationExecutor) -> Result<(), StorageError> {
        match &self.down {
            Some(down) => down(executor).await,
            None => Ok(()),
        }
    }
}

impl PartialEq for Migration {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.name == other.name
    }
}

impl Eq for Migration {}

impl Hash for Migration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

/// Applies migrations and records them in the tracking table.
pub struct MigrationRunner<E> {
    executor: E,
    config: MigrationConfig,
}

impl<E: MigrationExecutor> MigrationRunner<E> {
    pub fn new(executor: E) -> Self {
        Self::with_config(executor, MigrationConfig::default())
    }

    pub fn with_config(executor: E, config: MigrationConfig) -> Self {
        Self { executor, config }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Create the tracking table if it does not exist.
    pub async fn ensure_table(&self) -> Result<(), StorageError> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} (version BIGINT PRIMARY KEY, name TEXT NOT NULL, applied_at TIMESTAMPTZ NOT NULL)",
            self.config.table
        );
        self.executor.execute(&statement, &[]).await?;
        Ok(())
    }

    /// The highest applied version, or 0 when nothing has been applied.
    pub async fn current_version(&self) -> Result<u64, StorageError> {
        let statement = format!("SELECT MAX(version) AS version FROM {}", self.config.table);
        let rows = self.executor.query(&statement, &[]).await?;

        match rows.first().and_then(|row| row.get("version")) {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Int(version)) => u64::try_from(*version).map_err(|_| {
                StorageError::StorageError(format!(
                    "Invalid version {} in {}",
                    version, self.config.table
                ))
            }),
            Some(other) => Err(StorageError::StorageError(format!(
                "Invalid version {:?} in {}",
                other, self.config.table
            ))),
        }
    }

    /// Migrations newer than the current version, ascending.
    pub async fn pending(&self, migrations: &[Migration]) -> Result<Vec<Migration>, StorageError> {
        check_versions(migrations)?;
        self.ensure_table().await?;
        let current = self.current_version().await?;
        select_pending(migrations, current)
    }

    /// Apply every pending migration and return the versions applied.
    ///
    /// Each migration is recorded right after its forward action succeeds. A
    /// failing action stops the run and its error is returned unchanged;
    /// migrations applied earlier in the run stay recorded.
    #[instrument(skip_all, fields(table = %self.config.table))]
    pub async fn run(&self, migrations: &[Migration]) -> Result<Vec<u64>, StorageError> {
        let pending = self.pending(migrations).await?;
        debug!(pending = pending.len(), "running migrations");

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            migration.up(&self.executor).await?;
            self.record(&migration).await?;
            info!(version = migration.version, name = %migration.name, "applied migration");
            applied.push(migration.version);
        }

        Ok(applied)
    }

    /// Run a migration's reverse action and remove its tracking row.
    #[instrument(skip_all, fields(table = %self.config.table, version = migration.version))]
    pub async fn revert(&self, migration: &Migration) -> Result<(), StorageError> {
        migration.down(&self.executor).await?;

        let statement = format!("DELETE FROM {} WHERE version = $1", self.config.table);
        self.executor
            .execute(&statement, &[Value::from(migration.version)])
            .await?;

        info!(version = migration.version, name = %migration.name, "reverted migration");
        Ok(())
    }

    async fn record(&self, migration: &Migration) -> Result<(), StorageError> {
        let statement = format!(
            "INSERT INTO {} (version, name, applied_at) VALUES ($1, $2, $3)",
            self.config.table
        );
        let args = [
            Value::from(migration.version),
            Value::from(migration.name.as_str()),
            Value::from(StorageDatetime::now()),
        ];
        self.executor.execute(&statement, &args).await?;
        Ok(())
    }
}

/// Fail if two migrations share a version under different names.
fn check_versions(migrations: &[Migration]) -> Result<(), StorageError> {
    let mut names: HashMap<u64, &str> = HashMap::new();
    for migration in migrations {
        match names.insert(migration.version, &migration.name) {
            Some(other) if other != migration.name => {
                return Err(StorageError::StorageError(format!(
                    "Duplicate migration version {}: {} and {}",
                    migration.version, other, migration.name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Keep versions above `current`, sorted ascending. Entries with the same
/// version and name run once.
fn select_pending(migrations: &[Migration], current: u64) -> Result<Vec<Migration>, StorageError> {
    check_versions(migrations)?;
    let mut pending: Vec<Migration> = migrations
        .iter()
        .filter(|migration| migration.version > current)
        .cloned()
        .collect();
    pending.sort_by(|a, b| (a.version, &a.name).cmp(&(b.version, &b.name)));
    pending.dedup();
    Ok(pending)
}
