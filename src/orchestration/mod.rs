//! Sub-agent orchestration.
//!
//! [`orchestrator::AgentOrchestrator`] routes tasks to agents from the
//! registry, [`subagent::SubAgent`] runs one delegated task to completion,
//! and [`types`] is the shared vocabulary between them and the CLI.

pub mod orchestrator;
pub mod subagent;
pub mod types;

pub use orchestrator::AgentOrchestrator;
pub use subagent::SubAgent;
pub use types::{
    AgentStatus, AgentStatusSnapshot, DelegateOptions, SubAgentMetadata, SubAgentResult,
    TaskContext, TaskRequest,
};
