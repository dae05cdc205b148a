//! # Context-Brief Tailer
//!
//! Forward-only reader over the append-only context-brief log.
//!
//! - the byte offset only advances past complete, newline-terminated lines;
//!   a partial trailing line is read again once its newline arrives
//! - a file shorter than the offset was truncated or rotated, and reading
//!   restarts at zero
//! - malformed lines are skipped with a warning and counted
//! - with a cursor file, the offset is persisted after every read and
//!   restored on construction

use crate::error::MonitorResult;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// One decoded log line.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBriefEntry {
    pub payload: Map<String, Value>,
    pub registry_digest: Option<String>,
}

impl ContextBriefEntry {
    #[must_use]
    pub fn new(payload: Map<String, Value>) -> Self {
        let registry_digest = payload
            .get("registry_digest")
            .or_else(|| {
                payload
                    .get("checkpoint_record")
                    .and_then(|r| r.get("registry_digest"))
            })
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            payload,
            registry_digest,
        }
    }

    /// The checkpoint record: the `checkpoint_record` envelope field when
    /// present, otherwise the whole line.
    #[must_use]
    pub fn checkpoint_payload(&self) -> Value {
        match self.payload.get("checkpoint_record") {
            Some(record) => record.clone(),
            None => Value::Object(self.payload.clone()),
        }
    }

    /// The `detection_telemetry` envelope field, if it is an object.
    #[must_use]
    pub fn detection_telemetry(&self) -> Option<&Map<String, Value>> {
        self.payload
            .get("detection_telemetry")
            .and_then(Value::as_object)
    }
}

/// Incremental reader with a persisted cursor.
#[derive(Debug, Clone)]
pub struct ContextBriefTailer {
    path: PathBuf,
    offset: u64,
    cursor_path: Option<PathBuf>,
    poll_interval: Duration,
    skipped: u64,
}

impl ContextBriefTailer {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            cursor_path: None,
            poll_interval: Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS),
            skipped: 0,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Persist the offset in `cursor_path`, resuming from it if it exists.
    pub fn with_cursor(mut self, cursor_path: impl Into<PathBuf>) -> MonitorResult<Self> {
        let cursor_path = cursor_path.into();
        if cursor_path.exists() {
            let raw = std::fs::read_to_string(&cursor_path)?;
            match raw.trim().parse::<u64>() {
                Ok(offset) => self.offset = offset,
                Err(_) => warn!(cursor = %cursor_path.display(), "unreadable cursor, starting at 0"),
            }
        }
        self.cursor_path = Some(cursor_path);
        Ok(self)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Malformed lines skipped so far.
    #[must_use]
    pub fn skipped_lines(&self) -> u64 {
        self.skipped
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Entries appended since the previous read.
    pub fn read_new_entries(&mut self) -> MonitorResult<Vec<ContextBriefEntry>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.offset = 0;
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            debug!(path = %self.path.display(), "context brief truncated, rewinding");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buffer = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buffer)?;

        let Some(last_newline) = buffer.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &buffer[..=last_newline];

        let mut entries = Vec::new();
        for line in complete.split(|b| *b == b'\n') {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Value>(line) {
                Ok(Value::Object(payload)) => entries.push(ContextBriefEntry::new(payload)),
                Ok(_) => {
                    self.skipped += 1;
                    warn!(path = %self.path.display(), "skipping non-object context brief line");
                }
                Err(err) => {
                    self.skipped += 1;
                    warn!(path = %self.path.display(), error = %err, "skipping malformed context brief line");
                }
            }
        }

        self.offset += complete.len() as u64;
        self.persist_cursor()?;
        debug!(entries = entries.len(), offset = self.offset, "context brief read");
        Ok(entries)
    }

    fn persist_cursor(&self) -> MonitorResult<()> {
        if let Some(cursor) = &self.cursor_path {
            if let Some(parent) = cursor.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(cursor, self.offset.to_string())?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
