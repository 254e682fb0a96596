//! JSONL (JSON Lines) logging for selection sessions
//!
//! Provides append-only logging of session outcomes to `<log_dir>/sessions.jsonl`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use crate::generate::QuotaInfo;

/// How a session ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// A candidate was accepted
    Confirmed,
    /// The operator quit or a fatal error stopped generation
    Aborted,
}

/// Represents the outcome of a single selection session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    /// When the session finished
    pub timestamp: DateTime<Utc>,
    /// Models requested, one per slot
    pub models: Vec<String>,
    /// How the session ended
    pub status: SessionStatus,
    /// Why it was aborted, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Model of the accepted candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    /// Whether the accepted text was edited
    #[serde(default)]
    pub edited: bool,
    /// Cost of every candidate seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    /// Most recently observed quota
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaInfo>,
    /// Generation batches started
    pub batches: u32,
    /// Refine submissions
    pub refine_count: u32,
    /// Wall-clock duration of the session in milliseconds
    pub duration_ms: u64,
}

/// JSONL logger for session history
///
/// Each line is a JSON object representing a single session.
pub struct JsonlLogger {
    log_path: PathBuf,
}

impl JsonlLogger {
    /// Create a new JSONL logger
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        let log_path = log_dir.join("sessions.jsonl");

        Ok(Self { log_path })
    }

    /// Append a session record to the log
    pub fn append(&self, record: &SessionRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json =
            serde_json::to_string(record).context("Failed to serialize session record to JSON")?;

        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all session records, in chronological order
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is not valid JSON
    pub fn read_all(&self) -> Result<Vec<SessionRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        let mut records = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let record: SessionRecord = serde_json::from_str(line)
                .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))?;

            records.push(record);
        }

        Ok(records)
    }

    /// Get the path to the log file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
