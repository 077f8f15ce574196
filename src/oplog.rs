//! Append-only record of every pipeline run.
//!
//! Stored as JSONL at `<state_dir>/operations.jsonl`. The file is bounded:
//! once it holds more than `max_records` lines it is rewritten with the
//! newest `max_records`. Writers take an exclusive `fs2` lock on the file so
//! concurrent sessions never interleave partial lines.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::OperationsConfig;
use crate::paths::Paths;
use crate::safety::ValidationResult;
use crate::sandbox::ExecutionResult;

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Completed,
    Blocked,
    CancelledByUser,
    GenerationError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    /// The sanitized command that actually ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationRecord {
    pub fn new(query: &str, status: OperationStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: query.to_string(),
            generated_command: None,
            explanation: None,
            validation: None,
            final_command: None,
            execution: None,
            status,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationLog {
    path: PathBuf,
    max_records: usize,
    enabled: bool,
}

impl OperationLog {
    pub fn new(paths: &Paths, config: &OperationsConfig) -> Self {
        Self::at(paths.operations_log(), config.max_records, config.enabled)
    }

    pub fn at(path: impl Into<PathBuf>, max_records: usize, enabled: bool) -> Self {
        Self {
            path: path.into(),
            max_records: max_records.max(1),
            enabled,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append a record. Failures are logged and swallowed.
    pub fn record(&self, record: &OperationRecord) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.append(record) {
            warn!(
                "Failed to write operation log {}: {:#}",
                self.path.display(),
                e
            );
        }
    }

    fn append(&self, record: &OperationRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize operation")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .context("Failed to open operation log")?;
        file.lock_exclusive()?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let existing = content.lines().filter(|l| !l.trim().is_empty()).count();

        let result = if existing + 1 > self.max_records {
            debug!("Trimming operation log to {} records", self.max_records);
            let kept: Vec<&str> = content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .skip(existing + 1 - self.max_records)
                .chain(std::iter::once(line.as_str()))
                .collect();
            rewrite(&mut file, &kept)
        } else {
            file.seek(SeekFrom::End(0))
                .and_then(|_| writeln!(file, "{}", line))
        };

        let _ = FileExt::unlock(&file);
        result.context("Failed to write operation record")
    }

    /// Every readable record, oldest first. Corrupted lines are skipped.
    pub fn read_all(&self) -> Result<Vec<OperationRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read operation log")?;

        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OperationRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping corrupted operation record {}: {}", n + 1, e),
            }
        }
        Ok(records)
    }

    /// The newest `n` records, newest first.
    pub fn recent(&self, n: usize) -> Result<Vec<OperationRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(n);
        Ok(records)
    }
}

fn rewrite(file: &mut fs::File, lines: &[&str]) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    file.flush()
}
