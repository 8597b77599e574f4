//! Shared vocabulary of the orchestration layer.
//!
//! These types cross the seam between the [`super::orchestrator::AgentOrchestrator`],
//! the [`super::subagent::SubAgent`] it spawns, and the CLI surface that
//! renders results. Everything a tool observation or status poll can carry
//! derives [`serde::Serialize`].

use std::collections::BTreeMap;

use serde::Serialize;

/// Optional situational context handed to a delegated task: where the work
/// happens, which files matter, and free-form metadata rendered into the
/// sub-agent's system prompt.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub cwd: Option<String>,
    pub files: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl TaskContext {
    pub fn is_empty(&self) -> bool {
        self.cwd.is_none() && self.files.is_empty() && self.metadata.is_empty()
    }
}

/// Per-delegation knobs. `timeout_ms` falls back to the configured default
/// when unset.
#[derive(Debug, Clone, Default)]
pub struct DelegateOptions {
    pub timeout_ms: Option<u64>,
    pub context: Option<TaskContext>,
}

/// One entry in a `delegate_parallel` batch.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub agent: String,
    pub task: String,
    pub options: DelegateOptions,
}

impl TaskRequest {
    pub fn new(agent: impl Into<String>, task: impl Into<String>) -> Self {
        TaskRequest {
            agent: agent.into(),
            task: task.into(),
            options: DelegateOptions::default(),
        }
    }
}

/// Lifecycle of one sub-agent. Single-use: a sub-agent moves from `Idle`
/// through `Running` to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed)
    }
}

/// Point-in-time view of an active delegation, for status polling. The
/// underlying agent keeps moving after the snapshot is taken.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusSnapshot {
    pub id: String,
    pub agent: String,
    pub task: String,
    pub status: AgentStatus,
    /// ISO 8601 timestamp of when the delegation started.
    pub started_at: String,
    pub elapsed_ms: u64,
    /// Heuristic completion percentage: 0 while idle, 100 on terminal
    /// states, a share of the timeout budget while running. An estimate for
    /// display, not a measurement.
    pub progress: u8,
}

/// Execution metrics frozen when a sub-agent settles.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubAgentMetadata {
    /// Estimated from exchanged characters; exact accounting belongs to the
    /// provider.
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub tool_call_count: u32,
    /// Distinct tools invoked, sorted.
    pub tools_used: Vec<String>,
    /// Non-fatal problems observed during the run, plus the fatal message
    /// when the run failed.
    pub errors: Vec<String>,
}

/// The complete outcome of one delegated task. Immutable once returned;
/// callers observe either nothing or all of it.
#[derive(Debug, Clone, Serialize)]
pub struct SubAgentResult {
    pub agent: String,
    pub success: bool,
    /// Full final output (or the last narration for unfinished runs), with
    /// review dispositions appended when edits were proposed.
    pub output: String,
    /// Bounded prefix of the output, cut at a line boundary.
    pub summary: String,
    pub metadata: SubAgentMetadata,
    /// Fatal condition for failed runs; `None` on success.
    pub error: Option<String>,
}

impl SubAgentResult {
    /// A failure that happened before or instead of a loop run (rejected
    /// delegation, timeout). Metrics are zero except elapsed time.
    pub fn failure(agent: impl Into<String>, message: impl Into<String>, duration_ms: u64) -> Self {
        let message = message.into();
        SubAgentResult {
            agent: agent.into(),
            success: false,
            output: String::new(),
            summary: message.clone(),
            metadata: SubAgentMetadata {
                duration_ms,
                errors: vec![message.clone()],
                ..SubAgentMetadata::default()
            },
            error: Some(message),
        }
    }
}
