//! # statkeeper-core
//!
//! Shared primitives for the statkeeper statistics-analysis scheduler.
//!
//! - **Identifiers**: Strongly-typed ULID IDs for jobs and tasks
//! - **Table Names**: Validated `catalog.database.table` references
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span helpers
//!
//! ## Example
//!
//! ```rust
//! use statkeeper_core::prelude::*;
//!
//! let job = JobId::generate();
//! let table = TableName::internal("sales", "orders").unwrap();
//! assert!(table.is_internal());
//! # let _ = job;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod table;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{JobId, TaskId};
    pub use crate::table::TableName;
}

pub use error::{Error, Result};
pub use id::{JobId, TaskId};
pub use table::{INTERNAL_CATALOG, TableName};
