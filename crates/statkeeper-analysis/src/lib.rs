//! # statkeeper-analysis
//!
//! Statistics-analysis job scheduling for a database frontend.
//!
//! This crate accepts analyze requests, splits them into per-column tasks,
//! tracks every task's progress, and keeps job records durable and
//! replayable:
//!
//! - **Planning**: Resolve a request against the catalog into the columns
//!   and partitions that still need analysis
//! - **Execution**: Run synchronous jobs inline, or dispatch asynchronous
//!   tasks with bounded concurrency
//! - **Aggregation**: Fold task states into a monotonic job state
//! - **Durability**: Append job and task records to an edit log and rebuild
//!   the in-memory maps from it by replay
//! - **Staleness**: Decide when a table's statistics need refreshing and
//!   drive system jobs from it
//!
//! ## Core Concepts
//!
//! - **Job**: One analyze request, described by an [`AnalysisInfo`] with no
//!   task ID
//! - **Task**: One column (or the row count) of a job
//! - **System job**: A job issued by the auto-analyze loop; completed system
//!   jobs are kept in a bounded history
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use statkeeper_analysis::catalog::{InMemoryTableCatalog, TableMeta};
//! use statkeeper_analysis::collector::NoOpCollector;
//! use statkeeper_analysis::config::AnalysisConfig;
//! use statkeeper_analysis::error::Result;
//! use statkeeper_analysis::info::TableKind;
//! use statkeeper_analysis::journal::InMemoryEditLog;
//! use statkeeper_analysis::manager::{AnalysisManager, Collaborators};
//! use statkeeper_analysis::meta::InMemoryStatsMetaStore;
//! use statkeeper_analysis::request::AnalyzeRequest;
//! use statkeeper_core::TableName;
//!
//! # async fn run() -> Result<()> {
//! let table = TableName::internal("sales", "orders")?;
//! let catalog = Arc::new(InMemoryTableCatalog::new());
//! catalog.upsert_table(TableMeta::new(table.clone(), TableKind::Internal, ["id", "amount"]))?;
//!
//! let deps = Collaborators::new(
//!     catalog,
//!     Arc::new(InMemoryStatsMetaStore::new()),
//!     Arc::new(NoOpCollector),
//!     Arc::new(InMemoryEditLog::new()),
//! );
//! let manager = AnalysisManager::new(AnalysisConfig::default(), deps)?;
//!
//! let outcome = manager.build_and_assign_job(AnalyzeRequest::new(table)).await?;
//! if let Some(job_id) = outcome.job_id() {
//!     let job = manager.wait_for_job(job_id).await?;
//!     println!("{job}");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

// Internal modules - not exposed in public API.
pub(crate) mod periodic;
pub(crate) mod registry;

pub mod aggregate;
pub mod auto;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod error;
pub mod executor;
pub mod info;
pub mod journal;
pub mod manager;
pub mod meta;
pub mod metrics;
pub mod planner;
pub mod replay;
pub mod request;
pub mod staleness;
pub mod state;
pub mod status;
pub mod task;

pub use error::{Error, Result};
pub use info::AnalysisInfo;
pub use manager::{AnalysisManager, AssignOutcome, Collaborators};
pub use state::AnalysisState;
pub use status::TaskStatusWrapper;
