//! System prompt assembly.
//!
//! Combines an agent's persona with harness context: how to invoke tools,
//! which tools exist, the execution environment, and (for the top-level
//! session) the roster of agents available for delegation. Sub-agents get
//! the same structure minus the roster.

use std::path::Path;

/// Persona used by the top-level session when no agent definition applies.
pub const DEFAULT_PERSONA: &str = "\
You are a pragmatic coding assistant working directly in the user's project. \
Prefer small, verifiable steps: inspect before you change, and verify after \
you change. When the task is done, stop and summarize what you did.";

/// Build the complete system prompt for a loop run.
///
/// Structure:
/// 1. Persona (agent definition body, or [`DEFAULT_PERSONA`])
/// 2. Tool invocation format
/// 3. Tool reference
/// 4. Environment
/// 5. Constraints
/// 6. Delegation roster (top-level sessions only)
pub fn build_system_prompt(
    persona: &str,
    model: &str,
    workspace: &Path,
    tool_descriptions: &str,
    delegate_roster: Option<&str>,
) -> String {
    let workspace_display = workspace.display();
    let os = std::env::consts::OS;
    let persona = if persona.trim().is_empty() {
        DEFAULT_PERSONA
    } else {
        persona
    };

    let mut prompt = format!(
        "\
{persona}

## Invoking Tools
Invoke a tool by emitting an XML-style tag whose element name is the tool \
name. Parameters are double-quoted attributes. Tools that take content \
(write_file, shell_exec) carry it in the tag body; tools without content use \
a self-closing tag:

<read_file path=\"src/main.rs\"/>
<write_file path=\"notes.md\">New file content here</write_file>
<shell_exec>cargo test</shell_exec>

You may invoke several tools in one response; they run in the order written. \
Text before your first invocation is shown to the user as narration. When \
the task is complete, respond with no tool invocations and summarize the \
outcome.

## Available Tools
{tool_descriptions}

## Environment
- Model: {model}
- OS: {os}
- Workspace: {workspace_display}
- Shell commands execute in the workspace directory

## Constraints
- Proposed file writes are reviewed before they reach disk
- Shell commands are filtered against a security blocklist and time out
- Read access is unrestricted"
    );

    if let Some(roster) = delegate_roster {
        prompt.push_str(&format!(
            "\n\n## Delegation\n\
             You can hand a focused subtask to a specialist agent with the \
             delegate tool. Available agents:\n{roster}"
        ));
    }

    prompt
}
