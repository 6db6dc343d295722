//! Immutable per-job configuration snapshot.
//!
//! At job creation the base settings are merged with job-specific values
//! (`[job]` table: id, user, media, job directory, log path) and frozen as
//! `config.snapshot.toml` in the job root. Every later run of the job,
//! including resumes, reads this file and never the base config again.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::manager::{ConfigError, ConfigResult};
use super::settings::Settings;
use crate::fs_utils::write_atomic;
use crate::jobs::{Job, JobId, JobLayout};

/// Job-specific values written into the snapshot's `[job]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOverrides {
    pub job_id: JobId,
    pub user_id: u32,
    pub input_media: PathBuf,
    pub job_dir: PathBuf,
    pub log_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl JobOverrides {
    fn from_job(job: &Job) -> Self {
        let layout = JobLayout::new(&job.job_dir);
        Self {
            job_id: job.id,
            user_id: job.user_id,
            input_media: job.input_media.clone(),
            job_dir: job.job_dir.clone(),
            log_path: layout.log_file(),
            created_at: job.created_at,
        }
    }

    /// Rebuild the [`Job`] record this snapshot was created for.
    pub fn to_job(&self) -> Job {
        Job {
            id: self.job_id,
            user_id: self.user_id,
            input_media: self.input_media.clone(),
            job_dir: self.job_dir.clone(),
            created_at: self.created_at,
        }
    }
}

/// Read-only handle to a job's frozen configuration.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    path: PathBuf,
    table: toml::Table,
    settings: Settings,
    job: JobOverrides,
}

impl ConfigSnapshot {
    /// Freeze `base` plus the job's own values into the job root.
    ///
    /// Fails with [`ConfigError::SnapshotExists`] if the job already has a
    /// snapshot.
    pub fn materialize(base: &Settings, job: &Job) -> ConfigResult<Self> {
        let path = JobLayout::new(&job.job_dir).config_snapshot();
        if path.exists() {
            return Err(ConfigError::SnapshotExists(path));
        }

        let overrides = JobOverrides::from_job(job);
        let mut table = match toml::Value::try_from(base)? {
            toml::Value::Table(table) => table,
            _ => return Err(invalid(&path, "settings did not serialize to a table")),
        };
        table.insert("job".to_string(), toml::Value::try_from(&overrides)?);

        let mut content = format!(
            "# Frozen configuration for job {}. Do not edit.\n\n",
            overrides.job_id
        );
        content.push_str(&toml::to_string_pretty(&table)?);
        write_atomic(&path, content.as_bytes())?;

        tracing::debug!("Wrote config snapshot {}", path.display());

        Ok(Self {
            path,
            table,
            settings: base.clone(),
            job: overrides,
        })
    }

    /// Read the snapshot stored in `job_dir`.
    pub fn load(job_dir: &Path) -> ConfigResult<Self> {
        let path = JobLayout::new(job_dir).config_snapshot();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let content = fs::read_to_string(&path)?;
        let table: toml::Table = toml::from_str(&content)?;

        let job: JobOverrides = table
            .get("job")
            .cloned()
            .ok_or_else(|| invalid(&path, "missing [job] table"))?
            .try_into()?;

        let mut settings_table = table.clone();
        settings_table.remove("job");
        let settings: Settings = toml::Value::Table(settings_table).try_into()?;

        Ok(Self {
            path,
            table,
            settings,
            job,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn job(&self) -> &JobOverrides {
        &self.job
    }

    /// Look up a dotted key such as `pipeline.target_language` or `job.user_id`.
    pub fn value(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let mut current = self.table.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// String value at `key`, if present and a string.
    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(|v| v.as_str())
    }

    /// Whether the value at `key` switches something on.
    ///
    /// `true`, a non-empty string and a non-zero integer count as enabled;
    /// anything else, including a missing key, does not.
    pub fn is_enabled(&self, key: &str) -> bool {
        match self.value(key) {
            Some(toml::Value::Boolean(b)) => *b,
            Some(toml::Value::String(s)) => !s.trim().is_empty(),
            Some(toml::Value::Integer(i)) => *i != 0,
            _ => false,
        }
    }
}

fn invalid(path: &Path, message: &str) -> ConfigError {
    ConfigError::InvalidSnapshot {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn test_job(dir: &Path) -> Job {
        let job_dir = dir.join("20250101-001");
        fs::create_dir_all(&job_dir).unwrap();
        Job {
            id: JobId::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), 1),
            user_id: 1,
            input_media: dir.join("talk.mkv"),
            job_dir,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn materialize_then_load_returns_same_values() {
        let dir = tempdir().unwrap();
        let job = test_job(dir.path());
        let mut settings = Settings::default();
        settings.pipeline.target_language = Some("fr".to_string());

        let snapshot = ConfigSnapshot::materialize(&settings, &job).unwrap();
        assert!(snapshot.path().ends_with("config.snapshot.toml"));

        let loaded = ConfigSnapshot::load(&job.job_dir).unwrap();
        assert_eq!(loaded.settings(), &settings);
        assert_eq!(loaded.job().job_id.to_string(), "20250101-001");
        assert_eq!(loaded.job().user_id, 1);
        assert_eq!(loaded.job().to_job().job_dir, job.job_dir);
        assert_eq!(loaded.str_value("pipeline.target_language"), Some("fr"));
        assert_eq!(
            loaded.value("job.user_id").and_then(|v| v.as_integer()),
            Some(1)
        );
    }

    #[test]
    fn snapshot_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let job = test_job(dir.path());

        ConfigSnapshot::materialize(&Settings::default(), &job).unwrap();
        let err = ConfigSnapshot::materialize(&Settings::default(), &job).unwrap_err();
        assert!(matches!(err, ConfigError::SnapshotExists(_)));
    }

    #[test]
    fn snapshot_ignores_later_base_changes() {
        let dir = tempdir().unwrap();
        let job = test_job(dir.path());
        let mut settings = Settings::default();
        settings.pipeline.default_timeout_secs = 10;

        ConfigSnapshot::materialize(&settings, &job).unwrap();
        settings.pipeline.default_timeout_secs = 99;

        let loaded = ConfigSnapshot::load(&job.job_dir).unwrap();
        assert_eq!(loaded.settings().pipeline.default_timeout_secs, 10);
    }

    #[test]
    fn is_enabled_interprets_values() {
        let dir = tempdir().unwrap();
        let job = test_job(dir.path());
        let mut settings = Settings::default();
        settings.pipeline.enable_mux = false;
        settings.pipeline.target_language = Some("de".to_string());

        let snapshot = ConfigSnapshot::materialize(&settings, &job).unwrap();

        assert!(snapshot.is_enabled("pipeline.enable_diarization"));
        assert!(!snapshot.is_enabled("pipeline.enable_mux"));
        assert!(snapshot.is_enabled("pipeline.target_language"));
        assert!(!snapshot.is_enabled("pipeline.glossary_path"));
        assert!(!snapshot.is_enabled("no.such.key"));
    }

    #[test]
    fn load_without_snapshot_is_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ConfigSnapshot::load(dir.path()),
            Err(ConfigError::NotFound(_))
        ));
    }
}
