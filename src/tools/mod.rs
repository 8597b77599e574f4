//! Tool execution for the agent loop.
//!
//! Tools are registered by name in a [`ToolSet`]; the loop dispatches parsed
//! invocations to handlers and feeds whatever comes back to the model as an
//! observation. Handler failures are observations too, never `Err`, so a bad
//! tool call costs the model an iteration instead of killing the session.
//!
//! `write_file` is deliberately absent from the handler map. The loop
//! intercepts it and turns it into a proposed edit for review, so no handler
//! ever touches the filesystem on the model's say-so.

pub mod builtin;
pub mod delegate;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::parser::ToolInvocation;
use crate::safety::SafetyLayer;

pub use builtin::{ListDirTool, ReadFileTool, SearchFilesTool, ShellExecTool};
pub use delegate::DelegateTool;

/// Loop-relevant classification of a tool name. Execution is open (any
/// registered handler); only these few names carry extra loop semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ReadFile,
    /// Intercepted by the loop; becomes a proposed edit.
    WriteFile,
    ListDir,
    Other,
}

impl ToolKind {
    pub fn classify(name: &str) -> ToolKind {
        match name {
            "read_file" => ToolKind::ReadFile,
            "write_file" => ToolKind::WriteFile,
            "list_dir" => ToolKind::ListDir,
            _ => ToolKind::Other,
        }
    }
}

/// What a handler hands back. `is_error` means the tool machinery could not
/// run the request (missing parameter, unreadable path); a command that ran
/// and exited nonzero is a successful observation of a failing command.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(text: impl Into<String>) -> Self {
        ToolOutcome {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        ToolOutcome {
            text: text.into(),
            is_error: true,
        }
    }
}

/// A tool outcome tagged with the tool that produced it, ready for the
/// conversation history and the session log.
#[derive(Debug, Clone)]
pub struct ToolObservation {
    pub tool: String,
    pub text: String,
    pub is_error: bool,
}

/// One executable tool. `describe` returns the markdown block embedded in
/// the system prompt; keep it in the same shape as the builtin blocks.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn describe(&self) -> String;
    async fn run(&self, invocation: &ToolInvocation, safety: &SafetyLayer) -> ToolOutcome;
}

/// Prompt block for the intercepted `write_file` tool. It has no handler,
/// but the model still needs to know how to invoke it.
const WRITE_FILE_DESCRIPTION: &str = "\
### write_file
Propose writing content to a file inside the workspace.
- **path** (attribute, required): file path relative to the workspace root
- The tag body is the complete new file content
- Proposed writes are collected and reviewed before anything touches disk; \
the observation confirms the proposal, not the write";

/// Named handlers plus the safety layer they run against.
#[derive(Clone)]
pub struct ToolSet {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    safety: Arc<SafetyLayer>,
}

impl ToolSet {
    pub fn new(safety: Arc<SafetyLayer>) -> Self {
        ToolSet {
            handlers: HashMap::new(),
            safety,
        }
    }

    /// The standard complement: read_file, list_dir, search_files,
    /// shell_exec.
    pub fn with_builtins(safety: Arc<SafetyLayer>) -> Self {
        let mut set = Self::new(safety);
        set.register(Arc::new(ReadFileTool));
        set.register(Arc::new(ListDirTool));
        set.register(Arc::new(SearchFilesTool));
        set.register(Arc::new(ShellExecTool));
        set
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// A copy of this set with one handler removed. Sub-agents get the
    /// parent's tools minus `delegate`, so delegation never recurses.
    pub fn without(&self, name: &str) -> ToolSet {
        let mut copy = self.clone();
        copy.handlers.remove(name);
        copy
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered handler names plus `write_file`, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.push("write_file".to_string());
        names.sort();
        names
    }

    pub fn safety(&self) -> &Arc<SafetyLayer> {
        &self.safety
    }

    /// Run one invocation. Unknown tools produce an error observation naming
    /// what is available, so the model can correct itself next iteration.
    pub async fn execute(&self, invocation: &ToolInvocation) -> ToolObservation {
        let outcome = match self.handlers.get(&invocation.tool) {
            Some(handler) => handler.run(invocation, &self.safety).await,
            None => ToolOutcome::error(format!(
                "Unknown tool '{}'. Available tools: {}",
                invocation.tool,
                self.names().join(", ")
            )),
        };
        ToolObservation {
            tool: invocation.tool.clone(),
            text: outcome.text,
            is_error: outcome.is_error,
        }
    }

    /// Markdown tool reference for the system prompt, restricted to the
    /// given allowlist when one is set. `write_file` is included unless the
    /// allowlist excludes it.
    pub fn prompt_descriptions(&self, allowed: Option<&BTreeSet<String>>) -> String {
        let permitted = |name: &str| allowed.is_none_or(|set| set.contains(name));

        let mut blocks: Vec<(String, String)> = self
            .handlers
            .values()
            .filter(|h| permitted(h.name()))
            .map(|h| (h.name().to_string(), h.describe()))
            .collect();
        if permitted("write_file") {
            blocks.push(("write_file".to_string(), WRITE_FILE_DESCRIPTION.to_string()));
        }
        blocks.sort_by(|a, b| a.0.cmp(&b.0));

        blocks
            .into_iter()
            .map(|(_, block)| block)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
