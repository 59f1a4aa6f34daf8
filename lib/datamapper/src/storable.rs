//! Storable trait and serde-based record conversion.
//!
//! Types implementing `Storable` get a default query factory
//! ([`Query::new`](crate::Query::new)) and changeset constructor
//! ([`Changeset::new`](crate::Changeset::new)) bound to their collection.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Record, StorageError, Value};

/// Trait for domain types that map onto one collection.
///
/// # Example
///
/// ```
/// use datamapper::{Query, Storable};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     pub id: i64,
///     pub name: String,
/// }
///
/// impl Storable for User {
///     fn table_name() -> &'static str {
///         "users"
///     }
/// }
///
/// let query = Query::<User>::new().eq("name", "ada").limit(1);
/// assert_eq!(query.collection(), "users");
/// ```
///
/// # Field Naming
///
/// Record keys are whatever serde produces for the type, so
/// `#[serde(rename = "...")]` controls the column name. Association fields
/// should be `#[serde(default, skip_serializing)]`: they are filled by
/// preloading, never stored.
pub trait Storable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The collection (table) name for this type.
    fn table_name() -> &'static str;

    /// Decode a record returned by an adapter.
    fn from_record(record: &Record) -> Result<Self, StorageError> {
        from_record(record)
    }

    /// Encode into a flat record.
    fn to_record(&self) -> Result<Record, StorageError> {
        to_record(self)
    }
}

/// Serialize a value into a flat record.
///
/// Fails when the value does not serialize to a JSON object or when a field
/// is not a scalar.
pub fn to_record<T: Serialize + ?Sized>(item: &T) -> Result<Record, StorageError> {
    let json = serde_json::to_value(item)?;

    let serde_json::Value::Object(obj) = json else {
        return Err(StorageError::StorageError(
            "Expected JSON object for record".to_string(),
        ));
    };

    obj.into_iter()
        .map(|(key, value)| {
            let value = Value::from_json(&key, value)?;
            Ok((key, value))
        })
        .collect()
}

/// Deserialize a record into a domain value.
///
/// Null values are omitted to match serde's `skip_serializing_if` behavior,
/// so `Option` fields decode to `None`.
pub fn from_record<T: DeserializeOwned>(record: &Record) -> Result<T, StorageError> {
    let mut obj = serde_json::Map::new();

    for (key, value) in record {
        if !value.is_null() {
            obj.insert(key.clone(), value.to_json());
        }
    }

    serde_json::from_value(serde_json::Value::Object(obj))
        .map_err(|e| StorageError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StorageDatetime, record};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: i64,
        email: String,
        nickname: Option<String>,
        created_at: StorageDatetime,
        #[serde(default, skip_serializing)]
        sessions: Vec<String>,
    }

    #[test]
    fn test_from_record_decodes_nulls_and_datetimes() {
        let created_at = StorageDatetime::now();
        let record = record! {
            "id" => 7,
            "email" => "a@b.com",
            "nickname" => None::<String>,
            "created_at" => created_at.clone(),
        };

        let account: Account = from_record(&record).unwrap();
        assert_eq!(account.id, 7);
        assert_eq!(account.nickname, None);
        assert_eq!(account.created_at, created_at);
        assert!(account.sessions.is_empty());
    }

    #[test]
    fn test_to_record_skips_association_fields() {
        let account = Account {
            id: 1,
            email: "a@b.com".to_string(),
            nickname: Some("ab".to_string()),
            created_at: StorageDatetime::now(),
            sessions: vec!["s1".to_string()],
        };

        let record = to_record(&account).unwrap();
        assert_eq!(record.get("nickname"), Some(&Value::from("ab")));
        assert!(!record.contains_key("sessions"));
    }

    #[test]
    fn test_malformed_record_is_a_deserialization_error() {
        let record = record! { "id" => "not a number", "email" => "a@b.com" };
        let err = from_record::<Account>(&record).unwrap_err();
        assert!(matches!(err, StorageError::Deserialization(_)));
    }
}
