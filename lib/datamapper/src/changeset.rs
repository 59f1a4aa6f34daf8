//! Cast-then-validate pipeline over untrusted input.
//!
//! A [`Changeset`] starts from a raw [`Record`] (form data, a decoded request
//! body) and only lets through the fields explicitly named in
//! [`cast`](Changeset::cast). Validations then act on the accepted fields. A
//! field that fails validation is moved out of the changes and into the
//! errors, so a field is never in both.
//!
//! The pipeline is a consuming builder: each step takes the changeset by
//! value and returns it.
//!
//! ```
//! use datamapper::{Changeset, Record, record};
//!
//! let input = record! { "name" => "ab", "email" => "a@b.com", "admin" => true };
//! let changeset = Changeset::for_table("users", input, |r: &Record| Ok(r.clone()))
//!     .cast(&["name", "email"])
//!     .validate_required("name")
//!     .validate_length("name", Some(3), None);
//!
//! assert!(!changeset.is_valid());
//! assert!(!changeset.changes().contains_key("admin"));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::query::Deserializer;
use crate::{Record, Storable, StorageError, Value};

/// Field name to validation messages. Messages keep the order validations
/// produced them.
pub type Errors = BTreeMap<String, Vec<String>>;

/// A whitelisted, validated set of changes destined for one collection.
pub struct Changeset<T> {
    collection: String,
    input: Record,
    deserializer: Deserializer<T>,
    permitted: BTreeSet<String>,
    changes: Record,
    errors: Errors,
}

impl<T: Storable> Changeset<T> {
    /// Create a changeset for the type's collection.
    pub fn new(input: Record) -> Self {
        Self::for_table(T::table_name(), input, T::from_record)
    }
}

impl<T> Changeset<T> {
    /// Create a changeset with an explicit collection name and deserializer.
    pub fn for_table(
        table: impl Into<String>,
        input: Record,
        deserializer: impl Fn(&Record) -> Result<T, StorageError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            collection: table.into(),
            input,
            deserializer: Arc::new(deserializer),
            permitted: BTreeSet::new(),
            changes: Record::new(),
            errors: Errors::new(),
        }
    }

    /// Accept the listed fields from the raw input.
    ///
    /// Fields present in the input are copied verbatim into the changes.
    /// Anything not cast can never reach storage through this changeset.
    pub fn cast(mut self, fields: &[&str]) -> Self {
        for field in fields {
            self.permitted.insert((*field).to_string());
            if let Some(value) = self.input.get(*field) {
                self.changes.insert((*field).to_string(), value.clone());
            }
        }
        self
    }

    /// Require a non-null, non-empty value for `field`.
    ///
    /// A field present in the raw input but never cast is cast first.
    pub fn validate_required(mut self, field: &str) -> Self {
        if !self.permitted.contains(field) && self.input.contains_key(field) {
            self = self.cast(&[field]);
        }

        let present = match self.changes.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        };

        if !present {
            self.add_error(field, "is required")
        } else {
            self
        }
    }

    /// Bound the character length of a string field.
    ///
    /// Does nothing if `field` is not in the changes. One message is added per
    /// violated bound.
    pub fn validate_length(mut self, field: &str, min: Option<usize>, max: Option<usize>) -> Self {
        let Some(value) = self.changes.get(field) else {
            return self;
        };

        let Some(text) = value.as_str() else {
            return self.add_error(field, "must be a string");
        };

        let length = text.chars().count();
        let mut messages = Vec::new();
        if let Some(min) = min.filter(|min| length < *min) {
            messages.push(format!("must be at least {} characters", min));
        }
        if let Some(max) = max.filter(|max| length > *max) {
            messages.push(format!("must be at most {} characters", max));
        }

        for message in messages {
            self = self.add_error(field, message);
        }
        self
    }

    /// Require the value of `field` to be one of `allowed`.
    ///
    /// Does nothing if `field` is not in the changes.
    pub fn validate_inclusion<V: Into<Value>>(
        self,
        field: &str,
        allowed: impl IntoIterator<Item = V>,
    ) -> Self {
        let Some(value) = self.changes.get(field) else {
            return self;
        };

        let included = allowed.into_iter().map(Into::into).any(|a| a == *value);
        if included {
            self
        } else {
            self.add_error(field, "is invalid")
        }
    }

    /// Run a custom check against the value of `field`.
    ///
    /// `check` returns an error message to reject the value. Does nothing if
    /// `field` is not in the changes.
    pub fn validate_change(self, field: &str, check: impl FnOnce(&Value) -> Option<String>) -> Self {
        let rejection = self.changes.get(field).and_then(check);
        match rejection {
            Some(message) => self.add_error(field, message),
            None => self,
        }
    }

    /// Set a change directly, bypassing the cast whitelist.
    ///
    /// For values computed by the application rather than supplied by the
    /// caller. Does not clear errors recorded for `field`.
    pub fn put_change(mut self, field: &str, value: impl Into<Value>) -> Self {
        if !self.errors.contains_key(field) {
            self.changes.insert(field.to_string(), value.into());
        }
        self
    }

    /// Record an error for `field`, removing it from the changes.
    pub fn add_error(mut self, field: &str, message: impl Into<String>) -> Self {
        self.changes.remove(field);
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn changes(&self) -> &Record {
        &self.changes
    }

    pub fn get_change(&self, field: &str) -> Option<&Value> {
        self.changes.get(field)
    }

    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Decode a stored record with this changeset's deserializer.
    pub fn deserialize(&self, record: &Record) -> Result<T, StorageError> {
        (self.deserializer)(record)
    }

    /// Snapshot the outcome for error reporting.
    pub fn to_invalid(&self) -> InvalidChangeset {
        InvalidChangeset {
            collection: self.collection.clone(),
            changes: self.changes.clone(),
            errors: self.errors.clone(),
        }
    }

    /// The changes if valid, otherwise the rejected changeset as an error.
    pub fn into_changes(self) -> Result<Record, StorageError> {
        if self.is_valid() {
            Ok(self.changes)
        } else {
            Err(self.to_invalid().into())
        }
    }
}

impl<T> fmt::Debug for Changeset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Changeset")
            .field("collection", &self.collection)
            .field("changes", &self.changes)
            .field("errors", &self.errors)
            .finish()
    }
}

/// A changeset rejected by [`Repository::insert`](crate::Repository::insert)
/// or [`Repository::update`](crate::Repository::update).
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidChangeset {
    pub collection: String,
    pub changes: Record,
    pub errors: Errors,
}

impl InvalidChangeset {
    /// `field message, ...` for display.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .flat_map(|(field, messages)| {
                messages
                    .iter()
                    .map(move |message| format!("{} {}", field, message))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn changeset(input: Record) -> Changeset<Record> {
        Changeset::for_table("users", input, |r: &Record| Ok(r.clone()))
    }

    #[test]
    fn test_uncast_fields_never_reach_changes() {
        let c = changeset(record! { "name" => "ada", "admin" => true }).cast(&["name", "email"]);

        assert_eq!(c.changes(), &record! { "name" => "ada" });
        assert!(c.is_valid());
    }

    #[test]
    fn test_required_rejects_missing_null_and_empty() {
        let c = changeset(record! { "a" => None::<String>, "b" => "" })
            .cast(&["a", "b", "c"])
            .validate_required("a")
            .validate_required("b")
            .validate_required("c");

        for field in ["a", "b", "c"] {
            assert_eq!(c.errors()[field], vec!["is required".to_string()]);
            assert!(c.get_change(field).is_none());
        }
        assert!(!c.is_valid());
    }

    #[test]
    fn test_required_auto_casts_fields_in_input() {
        let c = changeset(record! { "name" => "ada" }).validate_required("name");
        assert_eq!(c.get_change("name"), Some(&Value::from("ada")));
        assert!(c.is_valid());
    }

    #[test]
    fn test_length_skips_fields_not_in_changes() {
        let c = changeset(record! { "name" => "a" }).validate_length("name", Some(3), None);
        assert!(c.is_valid());
        assert!(c.changes().is_empty());
    }

    #[test]
    fn test_length_reports_each_violated_bound() {
        let c = changeset(record! { "code" => "abcdef", "age" => 3 })
            .cast(&["code", "age"])
            .validate_length("code", Some(8), Some(4))
            .validate_length("age", Some(1), None);

        assert_eq!(
            c.errors()["code"],
            vec![
                "must be at least 8 characters".to_string(),
                "must be at most 4 characters".to_string()
            ]
        );
        assert_eq!(c.errors()["age"], vec!["must be a string".to_string()]);
        assert!(c.changes().is_empty());
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        let c = changeset(record! { "name" => "åsa" })
            .cast(&["name"])
            .validate_length("name", None, Some(3));
        assert!(c.is_valid());
    }

    #[test]
    fn test_failed_validation_hides_field_from_later_validations() {
        let c = changeset(record! { "name" => "" })
            .cast(&["name"])
            .validate_required("name")
            .validate_length("name", Some(3), None);

        // The length check sees no field and adds nothing.
        assert_eq!(c.errors()["name"], vec!["is required".to_string()]);
    }

    #[test]
    fn test_cast_required_length_scenario() {
        let c = changeset(record! { "name" => "ab", "email" => "a@b.com", "extra" => "x" })
            .cast(&["name", "email"])
            .validate_required("name")
            .validate_length("name", Some(3), None);

        assert!(!c.is_valid());
        assert_eq!(
            c.errors()["name"],
            vec!["must be at least 3 characters".to_string()]
        );
        assert_eq!(c.changes(), &record! { "email" => "a@b.com" });
    }

    #[test]
    fn test_inclusion_and_custom_checks() {
        let c = changeset(record! { "role" => "root", "email" => "nope" })
            .cast(&["role", "email"])
            .validate_inclusion("role", ["admin", "member"])
            .validate_change("email", |v| match v.as_str() {
                Some(s) if s.contains('@') => None,
                _ => Some("has invalid format".to_string()),
            });

        assert_eq!(c.errors()["role"], vec!["is invalid".to_string()]);
        assert_eq!(c.errors()["email"], vec!["has invalid format".to_string()]);
        assert!(c.changes().is_empty());
    }

    #[test]
    fn test_put_change_does_not_resurrect_rejected_fields() {
        let c = changeset(record! { "slug" => "" })
            .cast(&["slug"])
            .validate_required("slug")
            .put_change("slug", "generated")
            .put_change("updated_by", 1);

        assert!(c.get_change("slug").is_none());
        assert_eq!(c.get_change("updated_by"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_into_changes_reports_errors() {
        let err = changeset(record! {})
            .validate_required("name")
            .into_changes()
            .unwrap_err();

        let invalid = err.invalid_changeset().unwrap();
        assert_eq!(invalid.collection, "users");
        assert_eq!(invalid.summary(), "name is required");
        assert_eq!(
            err.to_string(),
            "Validation failed for users: name is required"
        );
    }
}
