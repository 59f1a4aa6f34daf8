//! Database-agnostic, immutable query values.
//!
//! A [`Query`] never changes after construction: every builder method borrows
//! the receiver and returns a new query with one more element. The untyped
//! part of a query, its [`Criteria`], is what an [`Adapter`](crate::Adapter)
//! receives.

use std::fmt;
use std::sync::Arc;

use crate::association::{AssociationInfo, Preload};
use crate::{Record, Storable, StorageError, Value};

/// Turns a record returned by an adapter into a domain value.
pub type Deserializer<T> = Arc<dyn Fn(&Record) -> Result<T, StorageError> + Send + Sync>;

/// Filter conditions for queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// field = value
    Eq(String, Value),
    /// field != value
    Ne(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IN (values). An empty list matches nothing.
    In(String, Vec<Value>),
    /// field NOT IN (values). An empty list matches everything.
    NotIn(String, Vec<Value>),
    /// field LIKE pattern, with `%` matching any run and `_` one character.
    Like(String, String),
}

impl Filter {
    /// The field this filter applies to.
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _)
            | Filter::Ne(field, _)
            | Filter::Gt(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _)
            | Filter::Lte(field, _)
            | Filter::In(field, _)
            | Filter::NotIn(field, _)
            | Filter::Like(field, _) => field,
        }
    }
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// An order-by clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: Order,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: Order::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: Order::Desc,
        }
    }
}

/// The storage-facing part of a query: what to read and in which order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criteria {
    /// The collection to query.
    pub collection: String,
    /// Filter conditions, combined with AND.
    pub filters: Vec<Filter>,
    /// Order by clauses.
    pub sorts: Vec<Sort>,
    /// Maximum number of results.
    pub limit: Option<u64>,
}

impl Criteria {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            sorts: Vec::new(),
            limit: None,
        }
    }
}

/// An immutable read request against one collection.
///
/// Two queries are equal when their collection, limit, filters, sorts and
/// preloaded associations are pairwise equal in the same order. The
/// deserializer does not take part in equality.
pub struct Query<T> {
    criteria: Criteria,
    deserializer: Deserializer<T>,
    preloads: Vec<Arc<dyn Preload<T>>>,
}

impl<T: Storable> Query<T> {
    /// Create a new query for the type's collection.
    pub fn new() -> Self {
        Self::for_table(T::table_name(), T::from_record)
    }
}

impl<T: Storable> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Query<T> {
    /// Create a new query with an explicit collection name and deserializer.
    pub fn for_table(
        table: impl Into<String>,
        deserializer: impl Fn(&Record) -> Result<T, StorageError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            criteria: Criteria::new(table),
            deserializer: Arc::new(deserializer),
            preloads: Vec::new(),
        }
    }

    /// Add a filter condition.
    pub fn filter(&self, filter: Filter) -> Self {
        let mut next = self.clone();
        next.criteria.filters.push(filter);
        next
    }

    /// Add an equality filter (shorthand for Filter::Eq).
    pub fn eq(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an inequality filter.
    pub fn ne(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Ne(field.into(), value.into()))
    }

    /// Add a greater-than filter.
    pub fn gt(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(field.into(), value.into()))
    }

    /// Add a greater-than-or-equal filter.
    pub fn gte(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gte(field.into(), value.into()))
    }

    /// Add a less-than filter.
    pub fn lt(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt(field.into(), value.into()))
    }

    /// Add a less-than-or-equal filter.
    pub fn lte(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lte(field.into(), value.into()))
    }

    /// Add an IN filter (shorthand for Filter::In).
    pub fn r#in<V: Into<Value>>(
        &self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filter(Filter::In(field.into(), values))
    }

    /// Add a NOT IN filter.
    pub fn not_in<V: Into<Value>>(
        &self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filter(Filter::NotIn(field.into(), values))
    }

    /// Add a LIKE filter.
    pub fn like(&self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filter(Filter::Like(field.into(), pattern.into()))
    }

    /// Add an order-by clause.
    pub fn sort(&self, sort: Sort) -> Self {
        let mut next = self.clone();
        next.criteria.sorts.push(sort);
        next
    }

    /// Add an order-by clause from a field and direction.
    pub fn order_by(&self, field: impl Into<String>, order: Order) -> Self {
        self.sort(Sort {
            field: field.into(),
            order,
        })
    }

    /// Set the maximum number of results.
    pub fn limit(&self, limit: u64) -> Self {
        let mut next = self.clone();
        next.criteria.limit = Some(limit);
        next
    }

    /// Eagerly load an association for every fetched record.
    ///
    /// Associations load in the order they are attached.
    pub fn preload(&self, association: impl Preload<T> + 'static) -> Self {
        let mut next = self.clone();
        next.preloads.push(Arc::new(association));
        next
    }

    pub fn collection(&self) -> &str {
        &self.criteria.collection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.criteria.filters
    }

    pub fn sorts(&self) -> &[Sort] {
        &self.criteria.sorts
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.criteria.limit
    }

    pub fn preloads(&self) -> &[Arc<dyn Preload<T>>] {
        &self.preloads
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    /// Decode one record with this query's deserializer.
    pub fn deserialize(&self, record: &Record) -> Result<T, StorageError> {
        (self.deserializer)(record)
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            criteria: self.criteria.clone(),
            deserializer: Arc::clone(&self.deserializer),
            preloads: self.preloads.clone(),
        }
    }
}

impl<T> PartialEq for Query<T> {
    fn eq(&self, other: &Self) -> bool {
        self.criteria == other.criteria
            && self.preloads.len() == other.preloads.len()
            && self
                .preloads
                .iter()
                .zip(&other.preloads)
                .all(|(a, b)| a.info() == b.info())
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preloads: Vec<&AssociationInfo> = self.preloads.iter().map(|p| p.info()).collect();
        f.debug_struct("Query")
            .field("criteria", &self.criteria)
            .field("preloads", &preloads)
            .finish()
    }
}
