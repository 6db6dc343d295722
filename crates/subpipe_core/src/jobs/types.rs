//! Job identity types.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from job allocation and lookup.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Output root {path} is not writable: {source}")]
    OutputRootUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid job id '{0}' (expected YYYYMMDD-NNN)")]
    InvalidJobId(String),

    #[error("Job '{job_id}' not found under {root}")]
    NotFound { job_id: String, root: PathBuf },

    #[error("Input media not found: {0}")]
    MediaNotFound(PathBuf),

    #[error("No free job sequence number left for {0}")]
    SequenceExhausted(String),

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl JobError {
    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Date-based, human-sortable job identifier (`YYYYMMDD-NNN`).
///
/// Ordering follows the date first and the sequence number second, which
/// matches the lexical order of the rendered form as long as the sequence
/// stays below 1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId {
    date: NaiveDate,
    sequence: u32,
}

impl JobId {
    pub fn new(date: NaiveDate, sequence: u32) -> Self {
        Self { date, sequence }
    }

    /// Parse `YYYYMMDD-NNN`. The sequence part must be at least three digits.
    pub fn parse(s: &str) -> JobResult<Self> {
        let invalid = || JobError::InvalidJobId(s.to_string());

        let (date_part, seq_part) = s.split_once('-').ok_or_else(invalid)?;
        if date_part.len() != 8 || seq_part.len() < 3 {
            return Err(invalid());
        }
        if !seq_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let date = NaiveDate::parse_from_str(date_part, "%Y%m%d").map_err(|_| invalid())?;
        let sequence: u32 = seq_part.parse().map_err(|_| invalid())?;
        if sequence == 0 {
            return Err(invalid());
        }

        Ok(Self { date, sequence })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The `YYYYMMDD` prefix shared by every job of the same day.
    pub fn date_prefix(date: NaiveDate) -> String {
        date.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", Self::date_prefix(self.date), self.sequence)
    }
}

impl FromStr for JobId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

/// One processing request. Immutable once allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Owning user.
    pub user_id: u32,
    /// Media file the job converts.
    pub input_media: PathBuf,
    /// The job's root directory.
    pub job_dir: PathBuf,
    /// When the job was allocated.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn job_id_formats_zero_padded() {
        let id = JobId::new(date(2025, 1, 1), 1);
        assert_eq!(id.to_string(), "20250101-001");

        let id = JobId::new(date(2025, 12, 31), 42);
        assert_eq!(id.to_string(), "20251231-042");
    }

    #[test]
    fn job_id_parses_its_own_output() {
        let id: JobId = "20250101-007".parse().unwrap();
        assert_eq!(id.date(), date(2025, 1, 1));
        assert_eq!(id.sequence(), 7);
        assert_eq!(id.to_string(), "20250101-007");
    }

    #[test]
    fn job_id_rejects_malformed_input() {
        for bad in [
            "",
            "20250101",
            "2025011-001",
            "20251301-001",
            "20250101-01",
            "20250101-abc",
            "20250101-000",
            "notes.txt",
        ] {
            assert!(JobId::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn job_ids_order_by_date_then_sequence() {
        let a = JobId::new(date(2025, 1, 1), 9);
        let b = JobId::new(date(2025, 1, 1), 10);
        let c = JobId::new(date(2025, 1, 2), 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn job_id_serializes_as_string() {
        let id = JobId::new(date(2025, 1, 1), 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"20250101-003\"");

        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
