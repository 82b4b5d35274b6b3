//! Logging initialization and span helpers.
//!
//! Every scheduler component logs through `tracing`; binaries and tests call
//! [`init_logging`] once to install a subscriber.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; only the first call installs a subscriber.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `statkeeper_analysis=debug`)
///
/// # Example
///
/// ```rust
/// use statkeeper_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        if let Err(e) = installed {
            tracing::debug!(error = %e, "keeping the subscriber installed by the host process");
        }
    });
}

/// Creates a span for the execution of one analysis task.
#[must_use]
pub fn task_span(operation: &str, job_id: &str, task_id: &str) -> Span {
    tracing::info_span!(
        "analysis_task",
        op = operation,
        job_id = job_id,
        task_id = task_id,
    )
}
