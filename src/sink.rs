//! Log entry sinks
//!
//! A sink owns durable storage of log entries. Entries are staged first and
//! become durable on `commit`, which is also where record identifiers and
//! timestamps are assigned. The staging step is what lets creation entries,
//! logged only once the engine has handed out entity identifiers, ride a
//! second sink cycle after the main one.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::entry::LogEntry;
use crate::error::{DaybookError, DaybookResult};

/// Staged, durable-on-commit storage of log entries
pub trait LogSink {
    /// Buffer an entry for the next commit cycle, taking ownership
    fn stage(&mut self, entry: LogEntry) -> DaybookResult<()>;

    /// Number of staged, not yet durable entries
    fn staged_len(&self) -> usize;

    /// Check whether staged entries await a commit cycle
    fn has_staged(&self) -> bool {
        self.staged_len() > 0
    }

    /// Durably write all staged entries, assigning identifiers and
    /// timestamps, and clear the staging buffer
    ///
    /// Returns the number of entries written.
    fn commit(&mut self) -> DaybookResult<usize>;

    /// Drop staged entries without writing them (abandoned unit of work)
    fn discard_staged(&mut self);
}

/// Sink that appends committed entries to a JSONL file
///
/// One JSON document per line, appended and flushed per commit. The read
/// helpers exist for inspection and tests; the log is never rewritten.
pub struct JsonlSink {
    log_path: PathBuf,
    staged: Vec<LogEntry>,
}

impl JsonlSink {
    /// Create a sink writing to the given path
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            staged: Vec::new(),
        }
    }

    /// Read all entries from the log
    pub fn read_all(&self) -> DaybookResult<Vec<LogEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| DaybookError::Io(format!("Failed to open log file: {}", e)))?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                DaybookError::Io(format!("Failed to read line {}: {}", line_num + 1, e))
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let entry: LogEntry = serde_json::from_str(&line).map_err(|e| {
                DaybookError::Json(format!(
                    "Failed to parse log entry at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Read the most recent `count` entries
    pub fn read_recent(&self, count: usize) -> DaybookResult<Vec<LogEntry>> {
        let all = self.read_all()?;
        let start = all.len().saturating_sub(count);
        Ok(all[start..].to_vec())
    }

    /// Count the entries in the log
    ///
    /// Counts non-blank lines without parsing them, so a corrupt line still
    /// counts as an entry.
    pub fn entry_count(&self) -> DaybookResult<usize> {
        if !self.log_path.exists() {
            return Ok(0);
        }

        let file = File::open(&self.log_path)
            .map_err(|e| DaybookError::Io(format!("Failed to open log file: {}", e)))?;
        let reader = BufReader::new(file);

        let count = reader
            .lines()
            .filter(|line| matches!(line, Ok(l) if !l.trim().is_empty()))
            .count();

        Ok(count)
    }

    /// Check whether the log file exists
    pub fn exists(&self) -> bool {
        self.log_path.exists()
    }

    /// Path of the log file
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

impl LogSink for JsonlSink {
    fn stage(&mut self, entry: LogEntry) -> DaybookResult<()> {
        self.staged.push(entry);
        Ok(())
    }

    fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn commit(&mut self) -> DaybookResult<usize> {
        if self.staged.is_empty() {
            return Ok(0);
        }

        // Serialize the whole batch before touching the file
        let mut buffer = String::new();
        for entry in &mut self.staged {
            entry.id = Some(Uuid::new_v4());
            entry.timestamp = Some(Utc::now());

            let json = serde_json::to_string(entry)
                .map_err(|e| DaybookError::Json(format!("Failed to serialize log entry: {}", e)))?;
            buffer.push_str(&json);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| DaybookError::Io(format!("Failed to open log file: {}", e)))?;

        file.write_all(buffer.as_bytes())
            .map_err(|e| DaybookError::Io(format!("Failed to write log entries: {}", e)))?;

        file.flush()
            .map_err(|e| DaybookError::Io(format!("Failed to flush log file: {}", e)))?;

        let written = self.staged.len();
        self.staged.clear();
        debug!("committed {} log entries to {}", written, self.log_path.display());
        Ok(written)
    }

    fn discard_staged(&mut self) {
        if !self.staged.is_empty() {
            debug!("discarding {} staged log entries", self.staged.len());
            self.staged.clear();
        }
    }
}
