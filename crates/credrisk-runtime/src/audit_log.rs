//! Append-only audit log.
//!
//! Events are kept in memory for queries and, when a path is configured,
//! appended to a JSONL file with one `write_all` per line.
//!
//! Two locks are involved. The writer lock is held across sequence
//! assignment and the file write, so the file is always in sequence order.
//! The state lock only covers the in-memory list, so queries such as the
//! supervisor's history window never wait on the disk.
//!
//! The write itself is blocking and runs on the calling task's thread. Lines
//! are a few hundred bytes and written once per pipeline step, which keeps
//! the stall well below a model call. A slow or network-mounted audit path
//! will delay concurrent evaluations by that much.
//!
//! A failed write is retried once against `<path>.backup`. If that fails too
//! the error is logged and swallowed: auditing never fails an evaluation.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use credrisk_core::AuditEvent;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct AuditState {
    next_sequence: u64,
    events: Vec<AuditEvent>,
}

/// Shared audit sink.
#[derive(Debug)]
pub struct AuditLog {
    path: Option<PathBuf>,
    state: Mutex<AuditState>,
    writer: Mutex<()>,
}

impl AuditLog {
    /// A log that keeps events in memory only.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(AuditState {
                next_sequence: 1,
                events: Vec::new(),
            }),
            writer: Mutex::new(()),
        }
    }

    /// Open a file-backed log, reloading any events already in the file.
    ///
    /// Lines that do not decode, such as a line torn by a crash, are skipped.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let events = load_events(&path);
        let next_sequence = events.iter().map(|e| e.sequence).max().unwrap_or(0) + 1;

        tracing::debug!(
            path = %path.display(),
            loaded = events.len(),
            "Opened audit log"
        );

        Self {
            path: Some(path),
            state: Mutex::new(AuditState {
                next_sequence,
                events,
            }),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an event and return its assigned sequence number.
    pub fn append(&self, mut event: AuditEvent) -> u64 {
        let Some(path) = &self.path else {
            return self.record(event);
        };

        let _writer = self.writer.lock();
        let sequence = self.record(event.clone());
        event.sequence = sequence;
        persist(path, &event);
        sequence
    }

    fn record(&self, mut event: AuditEvent) -> u64 {
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        event.sequence = sequence;
        state.events.push(event);
        sequence
    }

    /// All events of one evaluation, in sequence order.
    pub fn trail(&self, evaluation_id: &str) -> Vec<AuditEvent> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| e.evaluation_id == evaluation_id)
            .cloned()
            .collect()
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(limit);
        state.events[skip..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_events(path: &Path) -> Vec<AuditEvent> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read existing audit log");
            return Vec::new();
        }
    };

    let mut events: Vec<AuditEvent> = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable audit line");
                None
            }
        })
        .collect();
    events.sort_by_key(|e: &AuditEvent| e.sequence);
    events
}

fn persist(path: &Path, event: &AuditEvent) {
    let line = match serde_json::to_string(event) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(e) => {
            tracing::error!(error = %e, sequence = event.sequence, "Could not serialize audit event");
            return;
        }
    };

    let Err(primary) = append_line(path, &line) else {
        return;
    };

    let backup = backup_path(path);
    tracing::warn!(
        path = %path.display(),
        backup = %backup.display(),
        error = %primary,
        "Audit write failed, using backup file"
    );

    if let Err(e) = append_line(&backup, &line) {
        tracing::error!(
            backup = %backup.display(),
            error = %e,
            event_type = %event.event_type,
            evaluation_id = %event.evaluation_id,
            "Audit event lost"
        );
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".backup");
    PathBuf::from(name)
}
