//! SQL generation from criteria and change records.
//!
//! Builders return the SQL text together with the values to bind, in
//! placeholder order. NULL values are written as literals rather than bound,
//! so no parameter type has to be guessed for them.

use datamapper::{Criteria, Filter, Order, Record, Sort, Value};

/// A SQL statement and its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Hands out `$n` placeholders and collects their values.
#[derive(Debug, Default)]
struct Params {
    values: Vec<Value>,
}

impl Params {
    fn placeholder(&mut self, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.values.push(value.clone());
        format!("${}", self.values.len())
    }

    fn list(&mut self, values: &[Value]) -> String {
        values
            .iter()
            .map(|value| self.placeholder(value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Build a WHERE clause from filters.
fn build_where_clause(filters: &[Filter], params: &mut Params) -> String {
    if filters.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(field, value) => format!("{} = {}", field, params.placeholder(value)),
            Filter::Ne(field, value) => format!("{} != {}", field, params.placeholder(value)),
            Filter::Gt(field, value) => format!("{} > {}", field, params.placeholder(value)),
            Filter::Gte(field, value) => format!("{} >= {}", field, params.placeholder(value)),
            Filter::Lt(field, value) => format!("{} < {}", field, params.placeholder(value)),
            Filter::Lte(field, value) => format!("{} <= {}", field, params.placeholder(value)),
            Filter::In(_, values) if values.is_empty() => "FALSE".to_string(),
            Filter::In(field, values) => format!("{} IN ({})", field, params.list(values)),
            Filter::NotIn(_, values) if values.is_empty() => "TRUE".to_string(),
            Filter::NotIn(field, values) => {
                format!("{} NOT IN ({})", field, params.list(values))
            }
            Filter::Like(field, pattern) => format!(
                "{} LIKE {}",
                field,
                params.placeholder(&Value::from(pattern.as_str()))
            ),
        })
        .collect();

    format!(" WHERE {}", clauses.join(" AND "))
}

/// Build ORDER BY clause.
fn build_order_clause(sorts: &[Sort]) -> String {
    if sorts.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = sorts
        .iter()
        .map(|sort| {
            let dir = match sort.order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            format!("{} {}", sort.field, dir)
        })
        .collect();

    format!(" ORDER BY {}", clauses.join(", "))
}

pub(crate) fn select(criteria: &Criteria) -> Statement {
    let mut params = Params::default();
    let where_clause = build_where_clause(&criteria.filters, &mut params);
    let order_clause = build_order_clause(&criteria.sorts);

    let mut sql = format!(
        "SELECT * FROM {}{}{}",
        criteria.collection, where_clause, order_clause
    );
    if let Some(limit) = criteria.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Statement {
        sql,
        args: params.values,
    }
}

pub(crate) fn insert(collection: &str, changes: &Record) -> Statement {
    if changes.is_empty() {
        return Statement {
            sql: format!("INSERT INTO {} DEFAULT VALUES RETURNING *", collection),
            args: Vec::new(),
        };
    }

    let mut params = Params::default();
    let columns: Vec<&str> = changes.keys().map(String::as_str).collect();
    let placeholders: Vec<String> = changes
        .values()
        .map(|value| params.placeholder(value))
        .collect();

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            collection,
            columns.join(", "),
            placeholders.join(", ")
        ),
        args: params.values,
    }
}

/// UPDATE ... RETURNING *. Callers handle empty `changes`, which have no
/// valid SET clause.
pub(crate) fn update(criteria: &Criteria, changes: &Record) -> Statement {
    let mut params = Params::default();
    let assignments: Vec<String> = changes
        .iter()
        .map(|(column, value)| format!("{} = {}", column, params.placeholder(value)))
        .collect();
    let where_clause = build_where_clause(&criteria.filters, &mut params);

    Statement {
        sql: format!(
            "UPDATE {} SET {}{} RETURNING *",
            criteria.collection,
            assignments.join(", "),
            where_clause
        ),
        args: params.values,
    }
}

pub(crate) fn delete(criteria: &Criteria) -> Statement {
    let mut params = Params::default();
    let where_clause = build_where_clause(&criteria.filters, &mut params);

    Statement {
        sql: format!("DELETE FROM {}{}", criteria.collection, where_clause),
        args: params.values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamapper::record;

    fn users() -> Criteria {
        Criteria::new("users")
    }

    #[test]
    fn test_select_numbers_placeholders_in_filter_order() {
        let mut criteria = users();
        criteria.filters = vec![
            Filter::Eq("name".into(), "ada".into()),
            Filter::In("id".into(), vec![Value::Int(1), Value::Int(2)]),
            Filter::Like("email".into(), "%@example.com".into()),
        ];
        criteria.sorts = vec![Sort::desc("created_at"), Sort::asc("id")];
        criteria.limit = Some(10);

        let statement = select(&criteria);
        assert_eq!(
            statement.sql,
            "SELECT * FROM users WHERE name = $1 AND id IN ($2, $3) AND email LIKE $4 ORDER BY created_at DESC, id ASC LIMIT 10"
        );
        assert_eq!(
            statement.args,
            vec![
                Value::from("ada"),
                Value::Int(1),
                Value::Int(2),
                Value::from("%@example.com"),
            ]
        );
    }

    #[test]
    fn test_empty_in_lists_become_constants() {
        let mut criteria = users();
        criteria.filters = vec![
            Filter::In("id".into(), vec![]),
            Filter::NotIn("id".into(), vec![]),
            Filter::NotIn("role".into(), vec!["admin".into()]),
        ];

        let statement = select(&criteria);
        assert_eq!(
            statement.sql,
            "SELECT * FROM users WHERE FALSE AND TRUE AND role NOT IN ($1)"
        );
        assert_eq!(statement.args, vec![Value::from("admin")]);
    }

    #[test]
    fn test_nulls_are_literals() {
        let mut criteria = users();
        criteria.filters = vec![
            Filter::Ne("email".into(), Value::Null),
            Filter::Gte("age".into(), Value::Int(18)),
        ];

        let statement = select(&criteria);
        assert_eq!(
            statement.sql,
            "SELECT * FROM users WHERE email != NULL AND age >= $1"
        );
        assert_eq!(statement.args, vec![Value::Int(18)]);
    }

    #[test]
    fn test_insert_uses_sorted_columns_and_returning() {
        let statement = insert("users", &record! { "name" => "ada", "email" => None::<String> });
        assert_eq!(
            statement.sql,
            "INSERT INTO users (email, name) VALUES (NULL, $1) RETURNING *"
        );
        assert_eq!(statement.args, vec![Value::from("ada")]);

        let statement = insert("users", &record! {});
        assert_eq!(statement.sql, "INSERT INTO users DEFAULT VALUES RETURNING *");
    }

    #[test]
    fn test_update_binds_changes_before_filters() {
        let mut criteria = users();
        criteria.filters = vec![Filter::Lt("id".into(), Value::Int(5))];

        let statement = update(&criteria, &record! { "name" => "grace", "admin" => false });
        assert_eq!(
            statement.sql,
            "UPDATE users SET admin = $1, name = $2 WHERE id < $3 RETURNING *"
        );
        assert_eq!(
            statement.args,
            vec![Value::Bool(false), Value::from("grace"), Value::Int(5)]
        );
    }

    #[test]
    fn test_delete_without_filters_targets_whole_table() {
        assert_eq!(delete(&users()).sql, "DELETE FROM users");

        let mut criteria = users();
        criteria.filters = vec![Filter::Lte("id".into(), Value::Int(3))];
        assert_eq!(delete(&criteria).sql, "DELETE FROM users WHERE id <= $1");
    }
}
