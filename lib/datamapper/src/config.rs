//! Connection and migration configuration.

/// Default name of the migration tracking table.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Connection configuration for database backends.
///
/// This enum is extensible for future authentication methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
}

impl ConnectionConfig {
    pub fn url(&self) -> &str {
        match self {
            ConnectionConfig::Url(url) => url,
        }
    }
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// Settings for [`MigrationRunner`](crate::MigrationRunner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Table recording applied versions.
    pub table: String,
}

impl MigrationConfig {
    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::with_table(DEFAULT_MIGRATIONS_TABLE)
    }
}
