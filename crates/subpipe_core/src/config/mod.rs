//! Configuration management for subpipe.
//!
//! This module provides:
//! - TOML-based base configuration with logical sections
//! - Atomic file writes (write to temp, then rename)
//! - Section-level updates (only changed section is modified)
//! - Immutable per-job snapshots frozen at job creation
//!
//! # Example
//!
//! ```no_run
//! use subpipe_core::config::{ConfigManager, ConfigSection};
//!
//! let mut config = ConfigManager::new(".config/subpipe.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Jobs go to: {}", config.settings().paths.output_root);
//!
//! config.settings_mut().pipeline.target_language = Some("de".to_string());
//! config.update_section(ConfigSection::Pipeline).unwrap();
//! ```

mod manager;
mod settings;
mod snapshot;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    CacheSettings, ConfigSection, IdentityDecoder, LoggingSettings, PathSettings,
    PipelineSettings, Settings, WorkerSettings,
};
pub use snapshot::{ConfigSnapshot, JobOverrides};
