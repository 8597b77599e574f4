//! The `delegate` tool: lets the top-level model route sub-tasks to
//! registered agents.
//!
//! Registered only on the top-level tool set; the orchestrator strips it
//! from every sub-agent's set, so delegation cannot recurse. The observation
//! is the full [`SubAgentResult`] as JSON; a sub-agent that ran and failed
//! is still a successful observation, while a rejected delegation (unknown
//! or disabled agent) is an error observation the model can correct.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::parser::ToolInvocation;
use crate::orchestration::{AgentOrchestrator, DelegateOptions};
use crate::safety::SafetyLayer;
use crate::tools::{ToolHandler, ToolOutcome};

pub struct DelegateTool {
    orchestrator: Arc<AgentOrchestrator>,
}

impl DelegateTool {
    pub fn new(orchestrator: Arc<AgentOrchestrator>) -> Self {
        DelegateTool { orchestrator }
    }
}

#[async_trait]
impl ToolHandler for DelegateTool {
    fn name(&self) -> &'static str {
        "delegate"
    }

    fn describe(&self) -> String {
        let mut block = String::from(
            "### delegate\n\
             Hand a self-contained sub-task to a registered agent and get its result.\n\
             - **agent** (attribute, required): name of a registered agent\n\
             - **timeout_ms** (attribute, optional): per-delegation time budget\n\
             - The tag body is the full task description for the agent\n\
             Registered agents:",
        );
        let roster = self.orchestrator.list_enabled_agents();
        if roster.is_empty() {
            block.push_str(" (none)");
        } else {
            for def in roster {
                block.push_str(&format!("\n- **{}**: {}", def.name, def.description));
            }
        }
        block
    }

    async fn run(&self, invocation: &ToolInvocation, _safety: &SafetyLayer) -> ToolOutcome {
        let Some(agent) = invocation.param("agent") else {
            return ToolOutcome::error("delegate: missing required 'agent' attribute");
        };
        let task = invocation.body.trim();
        if task.is_empty() {
            return ToolOutcome::error(
                "delegate: missing task (describe the sub-task in the tag body)",
            );
        }

        let options = DelegateOptions {
            timeout_ms: invocation.param("timeout_ms").and_then(|v| v.parse().ok()),
            context: None,
        };
        match self.orchestrator.delegate_task(agent, task, options).await {
            Ok(result) => match serde_json::to_string_pretty(&result) {
                Ok(json) => ToolOutcome::ok(json),
                Err(e) => ToolOutcome::error(format!("delegate: result serialization failed: {e}")),
            },
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}
