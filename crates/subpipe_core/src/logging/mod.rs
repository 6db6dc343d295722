//! Logging infrastructure.
//!
//! This module provides:
//! - Per-job loggers writing `pipeline.log` with an optional echo callback
//! - Compact mode and a tail buffer of worker output for error diagnosis
//! - Integration with the `tracing` ecosystem
//!
//! # Example
//!
//! ```no_run
//! use subpipe_core::logging::{JobLogger, LogConfig};
//!
//! let logger = JobLogger::new(
//!     "20250101-001",
//!     "/jobs/20250101-001/pipeline.log",
//!     LogConfig::default(),
//!     None,
//! ).unwrap();
//!
//! logger.phase("demux");
//! logger.command("ffmpeg -i input.mkv ...");
//! logger.success("demux completed");
//! ```

mod job_logger;
mod types;

pub use job_logger::JobLogger;
pub use types::{LogCallback, LogConfig, LogLevel, MessagePrefix};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Output goes to stderr.
/// Should be called once at application startup.
pub fn init_tracing(default_level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter_str()));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(filter)
        .try_init();
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
