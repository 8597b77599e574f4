//! JSONL session logger for full session replay.
//!
//! Every loop run, top-level or delegated, writes structured events to its
//! own timestamped file under `{workspace}/.cadre/logs/`. Uses synchronous
//! `std::fs` since writes are small, buffered, and flushed after each event.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

/// Current UTC time as ISO 8601 with millisecond precision.
fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// One session event, serialized as a single JSON line.
///
/// The serde tag makes every line self-describing, so a replay tool can
/// process a log without knowing which session wrote it.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type")]
pub enum LogEntry {
    /// Marks the beginning of a loop run.
    #[serde(rename = "session_start")]
    SessionStart {
        timestamp: String,
        agent: String,
        model: String,
        workspace: String,
        task: String,
    },

    /// Free text the model produced before its tool invocations.
    #[serde(rename = "narration")]
    Narration {
        timestamp: String,
        iteration: u32,
        content: String,
    },

    /// A tool invocation parsed out of the model's response.
    #[serde(rename = "tool_call")]
    ToolCall {
        timestamp: String,
        iteration: u32,
        tool: String,
        params: serde_json::Value,
        body_bytes: usize,
    },

    /// The observation fed back for a tool invocation.
    #[serde(rename = "tool_result")]
    ToolResult {
        timestamp: String,
        iteration: u32,
        tool: String,
        result: String,
        is_error: bool,
    },

    /// A write_file invocation captured as a pending edit.
    #[serde(rename = "edit_proposed")]
    EditProposed {
        timestamp: String,
        iteration: u32,
        path: String,
        content_bytes: usize,
    },

    /// The review outcome for one proposed edit.
    #[serde(rename = "edit_reviewed")]
    EditReviewed {
        timestamp: String,
        path: String,
        disposition: String,
    },

    /// A sub-agent delegation observed from this session.
    #[serde(rename = "delegation")]
    Delegation {
        timestamp: String,
        agent: String,
        task: String,
        success: bool,
        duration_ms: u64,
    },

    /// An error encountered during the session.
    #[serde(rename = "error")]
    Error {
        timestamp: String,
        iteration: u32,
        message: String,
    },

    /// Marks the end of a loop run.
    #[serde(rename = "session_end")]
    SessionEnd {
        timestamp: String,
        iterations: u32,
        outcome: String,
    },
}

/// Append-only JSONL logger, one file per loop run.
///
/// Files are named `session-{ISO8601}-{id}.jsonl`; the short random id keeps
/// concurrent sub-agent sessions from landing in the same file.
pub struct SessionLogger {
    writer: BufWriter<fs::File>,
    log_path: PathBuf,
}

impl SessionLogger {
    pub fn new(workspace: &Path) -> anyhow::Result<Self> {
        let log_dir = workspace.join(".cadre").join("logs");
        fs::create_dir_all(&log_dir)?;

        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let short_id = &uuid::Uuid::new_v4().to_string()[..8];
        let log_path = log_dir.join(format!("session-{stamp}-{short_id}.jsonl"));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            log_path,
        })
    }

    /// Serialize a log entry as a single JSON line and flush.
    pub fn log_event(&mut self, event: &LogEntry) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Convenience: log a session_start event.
    pub fn log_session_start(
        &mut self,
        agent: &str,
        model: &str,
        workspace: &Path,
        task: &str,
    ) -> anyhow::Result<()> {
        self.log_event(&LogEntry::SessionStart {
            timestamp: now_iso(),
            agent: agent.to_string(),
            model: model.to_string(),
            workspace: workspace.display().to_string(),
            task: task.to_string(),
        })
    }

    /// Convenience: log a session_end event.
    pub fn log_session_end(&mut self, iterations: u32, outcome: &str) -> anyhow::Result<()> {
        self.log_event(&LogEntry::SessionEnd {
            timestamp: now_iso(),
            iterations,
            outcome: outcome.to_string(),
        })
    }
}

/// Stamp helper for callers composing [`LogEntry`] values by hand.
pub fn timestamp() -> String {
    now_iso()
}
