//! Association descriptors and batched preloading.
//!
//! An [`Association`] bundles what the preloader needs to know about one
//! relationship: its shape, the related collection, and caller-supplied
//! closures that extract keys and attach loaded records to a parent. Each
//! descriptor loads its related records with exactly one query per result
//! set, whatever the number of parents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{Adapter, Criteria, Filter, Query, StorageError, Value};

/// Relationship shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// The parent has many children; the foreign key lives on the child.
    Many,
    /// The parent has one child; the foreign key lives on the child.
    OneOwned,
    /// The parent holds the foreign key to one related record (belongs to).
    OneOwning,
}

/// Descriptive metadata for an association. Used for query equality, so it
/// covers everything that decides which related records get loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationInfo {
    /// The parent field the association populates.
    pub field: String,
    pub kind: AssociationKind,
    pub related_collection: String,
    /// Storage column holding the foreign key.
    pub foreign_key_column: String,
    /// Domain field holding the foreign key.
    pub foreign_key_field: String,
    /// Primary key column of the related collection (one-owning lookups).
    pub primary_key_column: String,
    /// Criteria of the related query, before the batch filter is added.
    pub related_criteria: Criteria,
    /// Associations preloaded on the related records.
    pub related_preloads: Vec<AssociationInfo>,
}

type KeyFn<R> = Arc<dyn Fn(&R) -> Value + Send + Sync>;
type AssignFn<P, V> = Arc<dyn Fn(P, V) -> P + Send + Sync>;

enum Relation<P, C> {
    Many {
        primary_key: KeyFn<P>,
        foreign_key: KeyFn<C>,
        assign: AssignFn<P, Vec<C>>,
    },
    OneOwned {
        primary_key: KeyFn<P>,
        foreign_key: KeyFn<C>,
        assign: AssignFn<P, C>,
    },
    OneOwning {
        foreign_key: KeyFn<P>,
        primary_key: KeyFn<C>,
        assign: AssignFn<P, C>,
    },
}

/// Describes how parents of type `P` relate to records of type `C`.
pub struct Association<P, C> {
    info: AssociationInfo,
    query: Arc<dyn Fn() -> Query<C> + Send + Sync>,
    relation: Relation<P, C>,
}

impl<P, C> Association<P, C> {
    /// A has-many association.
    ///
    /// `query` builds the base query for the related collection; its filters,
    /// sorts and preloads apply to every batch. `primary_key` reads the
    /// parent's key, `foreign_key` reads the child's reference to it, and
    /// `assign` returns the parent with its children attached.
    pub fn many(
        field: impl Into<String>,
        foreign_key_column: impl Into<String>,
        query: impl Fn() -> Query<C> + Send + Sync + 'static,
        primary_key: impl Fn(&P) -> Value + Send + Sync + 'static,
        foreign_key: impl Fn(&C) -> Value + Send + Sync + 'static,
        assign: impl Fn(P, Vec<C>) -> P + Send + Sync + 'static,
    ) -> Self {
        Self::build(
            field,
            AssociationKind::Many,
            foreign_key_column,
            Arc::new(query),
            Relation::Many {
                primary_key: Arc::new(primary_key),
                foreign_key: Arc::new(foreign_key),
                assign: Arc::new(assign),
            },
        )
    }

    /// A has-one association; the foreign key lives on the related record.
    pub fn one_owned(
        field: impl Into<String>,
        foreign_key_column: impl Into<String>,
        query: impl Fn() -> Query<C> + Send + Sync + 'static,
        primary_key: impl Fn(&P) -> Value + Send + Sync + 'static,
        foreign_key: impl Fn(&C) -> Value + Send + Sync + 'static,
        assign: impl Fn(P, C) -> P + Send + Sync + 'static,
    ) -> Self {
        Self::build(
            field,
            AssociationKind::OneOwned,
            foreign_key_column,
            Arc::new(query),
            Relation::OneOwned {
                primary_key: Arc::new(primary_key),
                foreign_key: Arc::new(foreign_key),
                assign: Arc::new(assign),
            },
        )
    }

    /// A belongs-to association; the parent holds the foreign key.
    ///
    /// Related records are looked up by
    /// [`primary_key_column`](AssociationInfo::primary_key_column), `id`
    /// unless changed with [`with_primary_key_column`](Self::with_primary_key_column).
    pub fn one_owning(
        field: impl Into<String>,
        foreign_key_column: impl Into<String>,
        query: impl Fn() -> Query<C> + Send + Sync + 'static,
        foreign_key: impl Fn(&P) -> Value + Send + Sync + 'static,
        primary_key: impl Fn(&C) -> Value + Send + Sync + 'static,
        assign: impl Fn(P, C) -> P + Send + Sync + 'static,
    ) -> Self {
        Self::build(
            field,
            AssociationKind::OneOwning,
            foreign_key_column,
            Arc::new(query),
            Relation::OneOwning {
                foreign_key: Arc::new(foreign_key),
                primary_key: Arc::new(primary_key),
                assign: Arc::new(assign),
            },
        )
    }

    fn build(
        field: impl Into<String>,
        kind: AssociationKind,
        foreign_key_column: impl Into<String>,
        query: Arc<dyn Fn() -> Query<C> + Send + Sync>,
        relation: Relation<P, C>,
    ) -> Self {
        let foreign_key_column = foreign_key_column.into();
        let related = query();
        Self {
            info: AssociationInfo {
                field: field.into(),
                kind,
                related_collection: related.collection().to_string(),
                foreign_key_field: foreign_key_column.clone(),
                foreign_key_column,
                primary_key_column: "id".to_string(),
                related_criteria: related.criteria().clone(),
                related_preloads: related.preloads().iter().map(|p| p.info().clone()).collect(),
            },
            query,
            relation,
        }
    }

    /// Name the domain field holding the foreign key, when it differs from
    /// the storage column.
    pub fn with_foreign_key_field(mut self, field: impl Into<String>) -> Self {
        self.info.foreign_key_field = field.into();
        self
    }

    /// Override the related collection's primary key column.
    pub fn with_primary_key_column(mut self, column: impl Into<String>) -> Self {
        self.info.primary_key_column = column.into();
        self
    }

    pub fn kind(&self) -> AssociationKind {
        self.info.kind
    }

    /// Run one batched query for `keys` against `column` and decode the rows,
    /// including any preloads the related query carries.
    async fn load(
        &self,
        adapter: &dyn Adapter,
        column: &str,
        keys: Vec<Value>,
    ) -> Result<Vec<C>, StorageError>
    where
        C: Send + Sync + 'static,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let query = (self.query)().filter(Filter::In(column.to_string(), keys));
        let records = adapter.read_many(query.criteria()).await?;
        let related = records
            .iter()
            .map(|record| query.deserialize(record))
            .collect::<Result<Vec<_>, _>>()?;

        preload_all(adapter, query.preloads(), related).await
    }
}

/// A type-erased association that can populate parents of type `P`.
///
/// Implemented by [`Association`]; queries hold preloads as
/// `Arc<dyn Preload<P>>` so one query can carry associations to different
/// related types.
#[async_trait]
pub trait Preload<P>: Send + Sync {
    fn info(&self) -> &AssociationInfo;

    /// Return `parents` with the association populated, in the same order.
    async fn preload(
        &self,
        adapter: &dyn Adapter,
        parents: Vec<P>,
    ) -> Result<Vec<P>, StorageError>;
}

#[async_trait]
impl<P, C> Preload<P> for Association<P, C>
where
    P: Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn info(&self) -> &AssociationInfo {
        &self.info
    }

    async fn preload(
        &self,
        adapter: &dyn Adapter,
        parents: Vec<P>,
    ) -> Result<Vec<P>, StorageError> {
        if parents.is_empty() {
            return Ok(parents);
        }

        let parent_count = parents.len();
        let (populated, related_count) = match &self.relation {
            Relation::Many {
                primary_key,
                foreign_key,
                assign,
            } => {
                let keys = distinct_keys(parents.iter().map(|p| primary_key(p)));
                let related = self
                    .load(adapter, &self.info.foreign_key_column, keys)
                    .await?;
                let related_count = related.len();

                let mut groups: HashMap<Value, Vec<C>> = HashMap::new();
                for child in related {
                    groups.entry(foreign_key(&child)).or_default().push(child);
                }

                let populated = parents
                    .into_iter()
                    .map(|parent| {
                        let children = groups
                            .get(&primary_key(&parent))
                            .cloned()
                            .unwrap_or_default();
                        assign(parent, children)
                    })
                    .collect();
                (populated, related_count)
            }
            Relation::OneOwned {
                primary_key,
                foreign_key,
                assign,
            } => {
                let keys = distinct_keys(parents.iter().map(|p| primary_key(p)));
                let related = self
                    .load(adapter, &self.info.foreign_key_column, keys)
                    .await?;
                let related_count = related.len();

                // Last record per key wins.
                let by_key: HashMap<Value, C> = related
                    .into_iter()
                    .map(|child| (foreign_key(&child), child))
                    .collect();

                let populated = attach_matches(parents, &by_key, |p| primary_key(p), &**assign);
                (populated, related_count)
            }
            Relation::OneOwning {
                foreign_key,
                primary_key,
                assign,
            } => {
                let keys = distinct_keys(parents.iter().map(|p| foreign_key(p)));
                let related = self
                    .load(adapter, &self.info.primary_key_column, keys)
                    .await?;
                let related_count = related.len();

                let by_key: HashMap<Value, C> = related
                    .into_iter()
                    .map(|record| (primary_key(&record), record))
                    .collect();

                let populated = attach_matches(parents, &by_key, |p| foreign_key(p), &**assign);
                (populated, related_count)
            }
        };

        debug!(
            association = %self.info.field,
            collection = %self.info.related_collection,
            parents = parent_count,
            related = related_count,
            "preloaded association"
        );

        Ok(populated)
    }
}

/// Run every preload in attachment order.
pub(crate) async fn preload_all<T: Send>(
    adapter: &dyn Adapter,
    preloads: &[Arc<dyn Preload<T>>],
    mut items: Vec<T>,
) -> Result<Vec<T>, StorageError> {
    for preload in preloads {
        items = preload.preload(adapter, items).await?;
    }
    Ok(items)
}

/// Distinct non-null keys in first-seen order.
fn distinct_keys(keys: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    keys.filter(|key| !key.is_null() && seen.insert(key.clone()))
        .collect()
}

/// Attach the matching record to each parent; parents without a match are
/// returned unmodified.
fn attach_matches<P, C: Clone>(
    parents: Vec<P>,
    by_key: &HashMap<Value, C>,
    key: impl Fn(&P) -> Value,
    assign: &(dyn Fn(P, C) -> P + Send + Sync),
) -> Vec<P> {
    parents
        .into_iter()
        .map(|parent| match by_key.get(&key(&parent)) {
            Some(related) => assign(parent, related.clone()),
            None => parent,
        })
        .collect()
}
