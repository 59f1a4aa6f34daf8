//! Migration runner against a recording executor.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Mutex;

use async_trait::async_trait;
use datamapper::{
    Migration, MigrationConfig, MigrationExecutor, MigrationRunner, Record, StorageError, Value,
    record,
};

/// Records statements and emulates the tracking table.
#[derive(Default)]
struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    applied: Mutex<Vec<i64>>,
}

impl RecordingExecutor {
    fn with_applied(versions: &[i64]) -> Self {
        Self {
            applied: Mutex::new(versions.to_vec()),
            ..Self::default()
        }
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn applied(&self) -> Vec<i64> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl MigrationExecutor for RecordingExecutor {
    async fn execute(&self, statement: &str, args: &[Value]) -> Result<u64, StorageError> {
        self.statements.lock().unwrap().push(statement.to_string());

        if statement.starts_with("FAIL") {
            return Err(StorageError::StorageError("syntax error".to_string()));
        }
        if statement.starts_with("INSERT INTO") {
            let version = args[0].as_i64().unwrap();
            self.applied.lock().unwrap().push(version);
        }
        if statement.starts_with("DELETE FROM") {
            let version = args[0].as_i64().unwrap();
            self.applied.lock().unwrap().retain(|v| *v != version);
        }
        Ok(1)
    }

    async fn query(&self, statement: &str, _args: &[Value]) -> Result<Vec<Record>, StorageError> {
        self.statements.lock().unwrap().push(statement.to_string());
        let max = self.applied.lock().unwrap().iter().max().copied();
        Ok(vec![record! { "version" => max }])
    }
}

fn create(version: u64, table: &str) -> Migration {
    Migration::sql(
        version,
        format!("create_{}", table),
        format!("CREATE TABLE {}", table),
        Some(&format!("DROP TABLE {}", table)),
    )
}

fn user_statements(executor: &RecordingExecutor) -> Vec<String> {
    executor
        .statements()
        .into_iter()
        .filter(|s| !s.contains("_migrations"))
        .filter(|s| s.starts_with("CREATE TABLE") || s.starts_with("DROP TABLE"))
        .collect()
}

#[tokio::test]
async fn applies_pending_in_version_order() {
    let runner = MigrationRunner::new(RecordingExecutor::default());
    let migrations = [create(3, "comments"), create(1, "users"), create(2, "posts")];

    let applied = runner.run(&migrations).await.unwrap();

    assert_eq!(applied, vec![1, 2, 3]);
    assert_eq!(
        user_statements(runner.executor()),
        vec![
            "CREATE TABLE users",
            "CREATE TABLE posts",
            "CREATE TABLE comments"
        ]
    );
    assert_eq!(runner.executor().applied(), vec![1, 2, 3]);
    assert_eq!(runner.current_version().await.unwrap(), 3);
}

#[tokio::test]
async fn skips_versions_at_or_below_current() {
    let runner = MigrationRunner::new(RecordingExecutor::with_applied(&[1, 2]));
    let migrations = [create(1, "users"), create(2, "posts"), create(3, "comments")];

    assert_eq!(runner.pending(&migrations).await.unwrap().len(), 1);
    let applied = runner.run(&migrations).await.unwrap();

    assert_eq!(applied, vec![3]);
    assert_eq!(
        user_statements(runner.executor()),
        vec!["CREATE TABLE comments"]
    );
}

#[tokio::test]
async fn conflicting_versions_are_rejected_before_any_statement() {
    let runner = MigrationRunner::new(RecordingExecutor::default());
    let migrations = [create(1, "users"), create(2, "posts"), create(2, "comments")];

    let err = runner.run(&migrations).await.unwrap_err();

    assert!(matches!(err, StorageError::StorageError(ref msg) if msg.contains("version 2")));
    assert!(runner.executor().statements().is_empty());
    assert!(runner.executor().applied().is_empty());
}

#[tokio::test]
async fn failure_stops_run_and_keeps_earlier_records() {
    let runner = MigrationRunner::new(RecordingExecutor::default());
    let migrations = [
        create(1, "users"),
        Migration::sql(2, "broken", "FAIL", None),
        create(3, "comments"),
    ];

    let err = runner.run(&migrations).await.unwrap_err();

    assert!(matches!(err, StorageError::StorageError(ref m) if m == "syntax error"));
    assert_eq!(runner.executor().applied(), vec![1]);
    assert_eq!(user_statements(runner.executor()), vec!["CREATE TABLE users"]);

    // A later run resumes after the last recorded version.
    let fixed = [create(1, "users"), create(2, "posts"), create(3, "comments")];
    assert_eq!(runner.run(&fixed).await.unwrap(), vec![2, 3]);
}

#[tokio::test]
async fn revert_runs_down_and_forgets_version() {
    let runner = MigrationRunner::new(RecordingExecutor::default());
    let migrations = [create(1, "users"), create(2, "posts")];
    runner.run(&migrations).await.unwrap();

    runner.revert(&migrations[1]).await.unwrap();

    assert_eq!(runner.executor().applied(), vec![1]);
    assert_eq!(
        user_statements(runner.executor()).last().map(String::as_str),
        Some("DROP TABLE posts")
    );
}

#[tokio::test]
async fn irreversible_down_is_a_no_op() {
    let executor = RecordingExecutor::default();
    let migration = Migration::sql(1, "seed", "INSERT INTO users DEFAULT VALUES", None);

    assert!(!migration.is_reversible());
    migration.down(&executor).await.unwrap();
    assert!(executor.statements().is_empty());
}

#[tokio::test]
async fn closure_migrations_receive_the_executor() {
    let runner = MigrationRunner::with_config(
        RecordingExecutor::default(),
        MigrationConfig::with_table("app_migrations"),
    );
    let migration = Migration::new(1, "two_statements", |executor| {
        Box::pin(async move {
            executor.execute("CREATE TABLE a", &[]).await?;
            executor.execute("CREATE TABLE b", &[]).await?;
            Ok::<(), StorageError>(())
        })
    });

    runner.run(&[migration]).await.unwrap();

    let statements = runner.executor().statements();
    assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS app_migrations"));
    assert!(statements.contains(&"CREATE TABLE a".to_string()));
    assert!(
        statements
            .iter()
            .any(|s| s.starts_with("INSERT INTO app_migrations"))
    );
}
