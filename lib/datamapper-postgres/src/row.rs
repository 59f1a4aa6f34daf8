//! Conversion between PostgreSQL rows/arguments and datamapper values.

use chrono::{DateTime, NaiveDateTime, Utc};
use datamapper::{Record, StorageDatetime, StorageError, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Row, TypeInfo};

/// Bind values to PgArguments in order.
pub fn bind_values(values: &[Value]) -> Result<PgArguments, StorageError> {
    let mut args = PgArguments::default();
    for value in values {
        bind_value(&mut args, value)?;
    }
    Ok(args)
}

/// Bind a Value to PgArguments.
fn bind_value(args: &mut PgArguments, value: &Value) -> Result<(), StorageError> {
    match value {
        Value::Null => args.add(None::<String>),
        Value::Bool(b) => args.add(*b),
        Value::Int(n) => args.add(*n),
        Value::Float(n) => args.add(*n),
        Value::String(s) => args.add(s.clone()),
        Value::Datetime(dt) => args.add(*dt.inner()),
    }
    .map_err(|e| StorageError::StorageError(e.to_string()))
}

/// Convert a row into a record keyed by column name.
pub fn row_to_record(row: &PgRow) -> Result<Record, StorageError> {
    row.columns()
        .iter()
        .map(|column| {
            let value = extract_column_value(row, column.ordinal(), column.type_info().name())?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

/// Extract a column value based on its PostgreSQL type.
fn extract_column_value(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, StorageError> {
    let value = match type_name {
        "BOOL" => get::<bool>(row, idx)?.map(Value::Bool),
        "INT2" => get::<i16>(row, idx)?.map(|n| Value::Int(n.into())),
        "INT4" => get::<i32>(row, idx)?.map(|n| Value::Int(n.into())),
        "INT8" => get::<i64>(row, idx)?.map(Value::Int),
        "FLOAT4" => get::<f32>(row, idx)?.map(|n| Value::Float(n.into())),
        "FLOAT8" => get::<f64>(row, idx)?.map(Value::Float),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, idx)?
            .map(|dt| Value::Datetime(StorageDatetime::from(dt))),
        "TIMESTAMP" => get::<NaiveDateTime>(row, idx)?
            .map(|dt| Value::Datetime(StorageDatetime::from(dt.and_utc()))),
        // Default: treat as string (VARCHAR, TEXT, CHAR, etc.)
        _ => get::<String>(row, idx)?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<Option<T>, StorageError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx)
        .map_err(|e| StorageError::StorageError(e.to_string()))
}
