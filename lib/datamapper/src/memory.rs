//! In-memory adapter with operation tracing.
//!
//! Evaluates [`Criteria`] against records held in process and records every
//! call it receives, so tests can assert on the exact sequence of adapter
//! operations (for example, that a transaction rolled back, or that a preload
//! issued a single read).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{
    Adapter, AdapterConnection, ConnectionConfig, Criteria, Filter, Order, Record, Sort,
    StorageError, Value,
};

/// Record of an adapter call for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterOp {
    Initialize,
    Close,
    ReadOne { criteria: Criteria },
    ReadMany { criteria: Criteria },
    Insert { collection: String, changes: Record },
    Update { criteria: Criteria, changes: Record },
    Delete { criteria: Criteria },
    BeginTransaction,
    Commit,
    Rollback,
}

impl AdapterOp {
    /// The collection this operation touched, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            AdapterOp::ReadOne { criteria }
            | AdapterOp::ReadMany { criteria }
            | AdapterOp::Update { criteria, .. }
            | AdapterOp::Delete { criteria } => Some(&criteria.collection),
            AdapterOp::Insert { collection, .. } => Some(collection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Record>>,
    next_ids: HashMap<String, i64>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    snapshot: Option<Tables>,
    closed: bool,
}

/// In-memory [`Adapter`] that records every operation.
///
/// Inserted records without a primary key get the next integer for their
/// collection. Transactions snapshot all collections on begin and restore the
/// snapshot on rollback; they do not nest.
#[derive(Debug)]
pub struct MemoryAdapter {
    primary_key: String,
    state: Mutex<State>,
    operations: Mutex<Vec<AdapterOp>>,
    fail_collections: Mutex<HashSet<String>>,
    fail_commits: AtomicBool,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    /// Creates an empty adapter keyed on `id`.
    pub fn new() -> Self {
        Self::with_primary_key("id")
    }

    pub fn with_primary_key(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            state: Mutex::new(State::default()),
            operations: Mutex::new(Vec::new()),
            fail_collections: Mutex::new(HashSet::new()),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Store records directly, without recording an operation.
    pub fn seed(&self, collection: &str, records: impl IntoIterator<Item = Record>) {
        let mut state = lock(&self.state);
        for record in records {
            state.tables.store(collection, &self.primary_key, record);
        }
    }

    /// Current contents of a collection, in insertion order.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        lock(&self.state)
            .tables
            .rows
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Every operation received so far.
    pub fn operations(&self) -> Vec<AdapterOp> {
        lock(&self.operations).clone()
    }

    pub fn clear_operations(&self) {
        lock(&self.operations).clear();
    }

    /// Make every subsequent write to `collection` fail.
    pub fn fail_writes_to(&self, collection: impl Into<String>) {
        lock(&self.fail_collections).insert(collection.into());
    }

    /// Make every subsequent commit fail, leaving the transaction open.
    pub fn fail_commits(&self) {
        self.fail_commits.store(true, AtomicOrdering::Release);
    }

    pub fn in_transaction(&self) -> bool {
        lock(&self.state).snapshot.is_some()
    }

    fn log(&self, op: AdapterOp) {
        lock(&self.operations).push(op);
    }

    fn check_writable(&self, collection: &str) -> Result<(), StorageError> {
        if lock(&self.fail_collections).contains(collection) {
            return Err(StorageError::StorageError(format!(
                "Write to {} rejected",
                collection
            )));
        }
        Ok(())
    }

    fn open_state(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        let state = lock(&self.state);
        if state.closed {
            return Err(StorageError::StorageError("Adapter is closed".to_string()));
        }
        Ok(state)
    }
}

impl Tables {
    fn store(&mut self, collection: &str, primary_key: &str, mut record: Record) -> Record {
        let next_id = self.next_ids.entry(collection.to_string()).or_insert(1);
        match record.get(primary_key) {
            None | Some(Value::Null) => {
                record.insert(primary_key.to_string(), Value::Int(*next_id));
                *next_id += 1;
            }
            Some(Value::Int(id)) if *id >= *next_id => *next_id = id + 1,
            Some(_) => {}
        }

        self.rows
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    fn select(&self, criteria: &Criteria) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .rows
            .get(&criteria.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(&criteria.filters, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| compare_rows(&criteria.sorts, a, b));

        if let Some(limit) = criteria.limit {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        rows
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.log(AdapterOp::Initialize);
        lock(&self.state).closed = false;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.log(AdapterOp::Close);
        lock(&self.state).closed = true;
        Ok(())
    }

    async fn read_one(&self, criteria: &Criteria) -> Result<Option<Record>, StorageError> {
        self.log(AdapterOp::ReadOne {
            criteria: criteria.clone(),
        });
        let mut limited = criteria.clone();
        limited.limit = Some(1);
        Ok(self.open_state()?.tables.select(&limited).into_iter().next())
    }

    async fn read_many(&self, criteria: &Criteria) -> Result<Vec<Record>, StorageError> {
        self.log(AdapterOp::ReadMany {
            criteria: criteria.clone(),
        });
        Ok(self.open_state()?.tables.select(criteria))
    }

    async fn insert(&self, collection: &str, changes: &Record) -> Result<Record, StorageError> {
        self.log(AdapterOp::Insert {
            collection: collection.to_string(),
            changes: changes.clone(),
        });
        self.check_writable(collection)?;

        let mut state = self.open_state()?;
        Ok(state
            .tables
            .store(collection, &self.primary_key, changes.clone()))
    }

    async fn update(
        &self,
        criteria: &Criteria,
        changes: &Record,
    ) -> Result<Vec<Record>, StorageError> {
        self.log(AdapterOp::Update {
            criteria: criteria.clone(),
            changes: changes.clone(),
        });
        self.check_writable(&criteria.collection)?;

        let mut state = self.open_state()?;
        let mut updated = Vec::new();
        if let Some(rows) = state.tables.rows.get_mut(&criteria.collection) {
            for row in rows
                .iter_mut()
                .filter(|row| matches_all(&criteria.filters, row))
            {
                row.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, criteria: &Criteria) -> Result<u64, StorageError> {
        self.log(AdapterOp::Delete {
            criteria: criteria.clone(),
        });
        self.check_writable(&criteria.collection)?;

        let mut state = self.open_state()?;
        let Some(rows) = state.tables.rows.get_mut(&criteria.collection) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !matches_all(&criteria.filters, row));
        Ok((before - rows.len()) as u64)
    }

    async fn begin_transaction(&self) -> Result<(), StorageError> {
        self.log(AdapterOp::BeginTransaction);
        let mut state = self.open_state()?;
        if state.snapshot.is_some() {
            return Err(StorageError::StorageError(
                "Transaction already open".to_string(),
            ));
        }
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<(), StorageError> {
        self.log(AdapterOp::Commit);
        let mut state = self.open_state()?;
        if self.fail_commits.load(AtomicOrdering::Acquire) {
            return Err(StorageError::StorageError("Commit rejected".to_string()));
        }
        state
            .snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| StorageError::StorageError("No transaction to commit".to_string()))
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        self.log(AdapterOp::Rollback);
        let mut state = self.open_state()?;
        let snapshot = state.snapshot.take().ok_or_else(|| {
            StorageError::StorageError("No transaction to roll back".to_string())
        })?;
        state.tables = snapshot;
        Ok(())
    }
}

/// Every connection opens a fresh, empty store; the URL is ignored.
#[async_trait]
impl AdapterConnection for MemoryAdapter {
    async fn connect(_config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError> {
        Ok(Self::new())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn matches_all(filters: &[Filter], row: &Record) -> bool {
    filters.iter().all(|filter| matches(filter, row))
}

/// Evaluate one filter with SQL semantics: comparisons involving NULL or
/// mismatched types never match.
fn matches(filter: &Filter, row: &Record) -> bool {
    let value = row.get(filter.field()).unwrap_or(&Value::Null);
    let equals = |other: &Value| value.compare(other) == Some(Ordering::Equal);

    match filter {
        Filter::Eq(_, other) => equals(other),
        Filter::Ne(_, other) => value.compare(other).is_some_and(|o| o != Ordering::Equal),
        Filter::Gt(_, other) => value.compare(other) == Some(Ordering::Greater),
        Filter::Gte(_, other) => value.compare(other).is_some_and(|o| o != Ordering::Less),
        Filter::Lt(_, other) => value.compare(other) == Some(Ordering::Less),
        Filter::Lte(_, other) => value.compare(other).is_some_and(|o| o != Ordering::Greater),
        Filter::In(_, values) => values.iter().any(equals),
        Filter::NotIn(_, values) => {
            values.is_empty() || (!value.is_null() && !values.iter().any(equals))
        }
        Filter::Like(_, pattern) => value.as_str().is_some_and(|text| like(text, pattern)),
    }
}

fn compare_rows(sorts: &[Sort], a: &Record, b: &Record) -> Ordering {
    for sort in sorts {
        let left = a.get(&sort.field).unwrap_or(&Value::Null);
        let right = b.get(&sort.field).unwrap_or(&Value::Null);

        // Nulls sort last in ascending order.
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
        };
        let ordering = match sort.order {
            Order::Asc => ordering,
            Order::Desc => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// SQL LIKE: `%` matches any run of characters, `_` exactly one.
///
/// Backtracks only to the most recent `%`, so the cost is bounded by the
/// product of the two lengths.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    // Pattern index after the last `%`, and the text index it is matched up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                star = Some((p + 1, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((after_star, matched)) => {
                    star = Some((after_star, matched + 1));
                    p = after_star;
                    t = matched + 1;
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}
