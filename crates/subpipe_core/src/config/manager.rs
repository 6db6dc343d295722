//! Config manager for loading, saving, and atomic updates.
//!
//! Key features:
//! - Atomic writes (write to temp file, then rename)
//! - Section-level updates (only modified section is changed)
//! - Unknown top-level sections are reported and dropped on load
//! - Missing keys are filled with defaults and written back

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::settings::{ConfigSection, Settings};
use crate::fs_utils::write_atomic;

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Config snapshot already exists: {0}")]
    SnapshotExists(PathBuf),

    #[error("Invalid config snapshot {path}: {message}")]
    InvalidSnapshot { path: PathBuf, message: String },
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Manages the base configuration file.
///
/// Handles loading, saving, and atomic section-level updates. Jobs never read
/// this file directly; they read their own [`ConfigSnapshot`](super::ConfigSnapshot).
pub struct ConfigManager {
    /// Path to the config file.
    config_path: PathBuf,
    /// Current settings loaded in memory.
    settings: Settings,
}

impl ConfigManager {
    /// Create a new config manager with the given config file path.
    ///
    /// Does not load the config - call `load()` or `load_or_create()` after.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            settings: Settings::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get a mutable reference to the current settings.
    ///
    /// Changes are only in memory until `save()` or `update_section()` is called.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Load config from file. Returns error if the file doesn't exist.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path)?;
        self.settings = toml::from_str(&content)?;
        Ok(())
    }

    /// Load config from file, creating it with defaults if it doesn't exist.
    ///
    /// Unknown sections are dropped and missing defaults are filled in; the
    /// file is rewritten when either happens.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            let (settings, was_modified) = parse_and_clean(&content)?;
            self.settings = settings;

            if was_modified {
                tracing::info!("Rewriting {} with defaults", self.config_path.display());
                self.save()?;
            }
        } else {
            self.settings = Settings::default();
            self.save()?;
        }
        Ok(())
    }

    /// Create the output root and cache root if they don't exist.
    pub fn ensure_dirs_exist(&self) -> ConfigResult<()> {
        for dir in [
            self.settings.paths.output_root(),
            self.settings.paths.cache_root(),
        ] {
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    /// Save the entire config atomically.
    pub fn save(&self) -> ConfigResult<()> {
        let content = self.generate_config_with_comments()?;
        write_atomic(&self.config_path, content.as_bytes())?;
        Ok(())
    }

    /// Update a specific section atomically.
    ///
    /// Re-reads the file from disk, replaces only the given section and
    /// writes back, so other sections keep whatever is on disk.
    pub fn update_section(&mut self, section: ConfigSection) -> ConfigResult<()> {
        let mut doc: toml::Table = if self.config_path.exists() {
            toml::from_str(&fs::read_to_string(&self.config_path)?)?
        } else {
            toml::Table::new()
        };

        doc.insert(
            section.table_name().to_string(),
            section_value(&self.settings, section)?,
        );

        let content = toml::to_string_pretty(&doc)?;
        write_atomic(&self.config_path, content.as_bytes())?;
        Ok(())
    }

    /// Generate config content with a comment above each section.
    fn generate_config_with_comments(&self) -> ConfigResult<String> {
        let mut output = String::new();
        output.push_str("# subpipe configuration\n");
        output.push_str("# Each job freezes a copy of this file as config.snapshot.toml.\n\n");

        for section in ConfigSection::ALL {
            output.push_str("# ");
            output.push_str(section.comment());
            output.push('\n');
            output.push_str(&render_section(&self.settings, section)?);
            output.push('\n');
        }

        Ok(output)
    }
}

/// Serialize one section of `settings` as a TOML value.
fn section_value(settings: &Settings, section: ConfigSection) -> ConfigResult<toml::Value> {
    let value = match section {
        ConfigSection::Paths => toml::Value::try_from(&settings.paths)?,
        ConfigSection::Logging => toml::Value::try_from(&settings.logging)?,
        ConfigSection::Pipeline => toml::Value::try_from(&settings.pipeline)?,
        ConfigSection::Cache => toml::Value::try_from(&settings.cache)?,
        ConfigSection::Workers => toml::Value::try_from(&settings.workers)?,
    };
    Ok(value)
}

/// Render one section including its `[table]` header.
fn render_section(settings: &Settings, section: ConfigSection) -> ConfigResult<String> {
    let mut table = toml::Table::new();
    table.insert(
        section.table_name().to_string(),
        section_value(settings, section)?,
    );
    Ok(toml::to_string_pretty(&table)?)
}

/// Parse config content and report whether it needs rewriting.
fn parse_and_clean(content: &str) -> ConfigResult<(Settings, bool)> {
    let doc: toml::Table = toml::from_str(content)?;
    let settings: Settings = toml::from_str(content)?;

    let valid: Vec<&str> = ConfigSection::ALL.iter().map(|s| s.table_name()).collect();
    let mut was_modified = false;
    for key in doc.keys() {
        if !valid.contains(&key.as_str()) {
            tracing::warn!("Dropping unknown config section [{}]", key);
            was_modified = true;
        }
    }

    // Missing sections or keys: the deserialized value carries defaults the
    // file doesn't have.
    let reparsed: toml::Table = toml::from_str(&toml::to_string_pretty(&settings)?)?;
    for section in ConfigSection::ALL {
        let name = section.table_name();
        let on_disk = doc.get(name).and_then(|v| v.as_table());
        let expected = reparsed.get(name).and_then(|v| v.as_table());
        match (on_disk, expected) {
            (Some(on_disk), Some(expected)) => {
                if expected.keys().any(|k| !on_disk.contains_key(k)) {
                    was_modified = true;
                }
            }
            (None, Some(_)) => was_modified = true,
            _ => {}
        }
    }

    Ok((settings, was_modified))
}
