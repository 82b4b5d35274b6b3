//! Qualified table names.
//!
//! Every analyze request targets one table addressed as
//! `catalog.database.table`. A two-part name resolves against the
//! [`INTERNAL_CATALOG`].
//!
//! # Example
//!
//! ```rust
//! use statkeeper_core::table::TableName;
//!
//! let name: TableName = "sales.orders".parse().unwrap();
//! assert_eq!(name.catalog(), "internal");
//! assert_eq!(name.to_string(), "internal.sales.orders");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Name of the catalog holding natively managed tables.
pub const INTERNAL_CATALOG: &str = "internal";

const MAX_IDENTIFIER_LEN: usize = 64;

/// A fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    catalog: String,
    database: String,
    table: String,
}

impl TableName {
    /// Creates a table name after validating each part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if any part is empty, too long, or
    /// contains characters other than ASCII alphanumerics, `_` and `-`.
    pub fn new(
        catalog: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self> {
        let name = Self {
            catalog: catalog.into(),
            database: database.into(),
            table: table.into(),
        };
        validate_identifier("catalog", &name.catalog)?;
        validate_identifier("database", &name.database)?;
        validate_identifier("table", &name.table)?;
        Ok(name)
    }

    /// Creates a table name in the internal catalog.
    ///
    /// # Errors
    ///
    /// See [`TableName::new`].
    pub fn internal(database: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        Self::new(INTERNAL_CATALOG, database, table)
    }

    /// Returns the catalog part.
    #[must_use]
    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    /// Returns the database part.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the bare table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns true if the table lives in the internal catalog.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.catalog == INTERNAL_CATALOG
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.database, self.table)
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [database, table] => Self::internal(*database, *table),
            [catalog, database, table] => Self::new(*catalog, *database, *table),
            _ => Err(Error::InvalidInput(format!(
                "table name '{s}' must be 'database.table' or 'catalog.database.table'"
            ))),
        }
    }
}

fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{kind} name cannot be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidInput(format!(
            "{kind} name '{value}' is too long (maximum {MAX_IDENTIFIER_LEN} characters)"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidInput(format!(
            "{kind} name '{value}' contains invalid characters"
        )));
    }
    Ok(())
}
