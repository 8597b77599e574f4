//! One delegated agent: a definition, an isolated loop, a structured result.
//!
//! A `SubAgent` wraps a single [`AgentLoop`] run with the persona, tool
//! allowlist, and iteration budget of its [`AgentDefinition`]. It is
//! single-use: construct, `execute` once, read the result. Failures of any
//! kind are folded into the returned [`SubAgentResult`]; `execute` itself
//! never fails, which is what lets `delegate_parallel` always produce one
//! result per task.
//!
//! Edits proposed by the loop flow through an [`EditReviewSession`] with the
//! orchestrator's approval handler before the result is returned, and the
//! review dispositions are appended to the output so the delegating caller
//! sees what actually landed on disk.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{AgentStatus, SubAgentMetadata, SubAgentResult, TaskContext};
use crate::agent::agent_loop::{AgentLoop, LoopEnd, LoopResult};
use crate::agent::logging::{timestamp, LogEntry, SessionLogger};
use crate::agent::review::{ApprovalHandler, EditReviewSession, ReviewSummary};
use crate::agent::system_prompt::build_system_prompt;
use crate::config::AppConfig;
use crate::provider::Provider;
use crate::registry::AgentDefinition;
use crate::tools::ToolSet;

/// Byte bound for the result summary. Cuts fall back to the nearest line
/// boundary inside the window.
const SUMMARY_LIMIT: usize = 500;

/// Rough average characters per token, used to estimate usage from
/// exchanged text.
const CHARS_PER_TOKEN: usize = 4;

pub struct SubAgent {
    id: String,
    definition: AgentDefinition,
    config: AppConfig,
    provider: Arc<dyn Provider>,
    tools: ToolSet,
    approval: Arc<dyn ApprovalHandler>,
    cancel: CancellationToken,
    status: Arc<Mutex<AgentStatus>>,
}

impl SubAgent {
    pub fn new(
        definition: AgentDefinition,
        config: AppConfig,
        provider: Arc<dyn Provider>,
        tools: ToolSet,
        approval: Arc<dyn ApprovalHandler>,
        cancel: CancellationToken,
    ) -> Self {
        SubAgent {
            id: Uuid::new_v4().to_string(),
            definition,
            config,
            provider,
            tools,
            approval,
            cancel,
            status: Arc::new(Mutex::new(AgentStatus::Idle)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.lock().unwrap()
    }

    /// Handle the orchestrator keeps in its active-set for status polling.
    pub fn status_handle(&self) -> Arc<Mutex<AgentStatus>> {
        self.status.clone()
    }

    /// Mark the agent failed and cancel its token. The loop stops at its
    /// next suspension point.
    pub fn abort(&self) {
        *self.status.lock().unwrap() = AgentStatus::Failed;
        self.cancel.cancel();
    }

    /// Run the definition's loop against `task`. Always returns a complete
    /// result; every failure mode is captured inside it.
    pub async fn execute(&self, task: &str, context: Option<&TaskContext>) -> SubAgentResult {
        *self.status.lock().unwrap() = AgentStatus::Running;
        let start = Instant::now();
        debug!(agent = %self.definition.name, id = %self.id, "sub-agent starting");

        let model = if self.definition.inherits_model() {
            self.config.model.clone()
        } else {
            self.definition.model.clone()
        };
        let provider = if self.definition.inherits_model() {
            self.provider.clone()
        } else {
            let temperature = self.definition.temperature.or(self.config.temperature);
            self.provider
                .for_model(&self.definition.model, temperature)
                .unwrap_or_else(|| self.provider.clone())
        };

        let system_prompt = build_system_prompt(
            &self.persona(context),
            &model,
            &self.config.workspace,
            &self
                .tools
                .prompt_descriptions(self.definition.allowed_tools.as_ref()),
            None,
        );
        let loop_context = render_loop_context(context);

        let logger = match SessionLogger::new(&self.config.workspace) {
            Ok(mut logger) => {
                if let Err(e) = logger.log_session_start(
                    &self.definition.name,
                    &model,
                    &self.config.workspace,
                    task,
                ) {
                    warn!(error = %e, "failed to write sub-agent session start");
                }
                Some(Arc::new(Mutex::new(logger)))
            }
            Err(e) => {
                warn!(error = %e, "sub-agent running without a session log");
                None
            }
        };

        let max_iterations = self
            .definition
            .max_iterations
            .unwrap_or(self.config.max_iterations);

        let mut agent_loop = AgentLoop::new(provider, self.tools.clone(), system_prompt)
            .with_max_iterations(max_iterations)
            .with_allowed_tools(self.definition.allowed_tools.clone())
            .with_cancellation(self.cancel.clone());
        if let Some(logger) = &logger {
            agent_loop = agent_loop.with_logger(logger.clone());
        }

        let outcome = agent_loop.run(task, loop_context.as_deref()).await;
        let result = match outcome {
            Ok(loop_result) => self.settle(loop_result, logger.as_ref(), start).await,
            Err(e) => SubAgentResult::failure(
                &self.definition.name,
                format!("session logging failed: {e}"),
                start.elapsed().as_millis() as u64,
            ),
        };

        *self.status.lock().unwrap() = if result.success {
            AgentStatus::Completed
        } else {
            AgentStatus::Failed
        };
        debug!(
            agent = %self.definition.name,
            success = result.success,
            duration_ms = result.metadata.duration_ms,
            "sub-agent settled"
        );
        result
    }

    /// Definition body plus a rendered metadata block when the caller
    /// supplied one.
    fn persona(&self, context: Option<&TaskContext>) -> String {
        let mut persona = self.definition.system_prompt.clone();
        if let Some(ctx) = context {
            if !ctx.metadata.is_empty() {
                persona.push_str("\n\n## Delegation Metadata\n");
                for (key, value) in &ctx.metadata {
                    persona.push_str(&format!("- **{key}**: {value}\n"));
                }
            }
        }
        persona
    }

    /// Map a finished loop run into the frozen result: review pending edits,
    /// convert the terminal state, compute metrics.
    async fn settle(
        &self,
        loop_result: LoopResult,
        logger: Option<&Arc<Mutex<SessionLogger>>>,
        start: Instant,
    ) -> SubAgentResult {
        let mut output = loop_result.final_text.clone();
        let mut errors = loop_result.errors.clone();

        // Review whatever was proposed, even when the loop ended early; an
        // edit collected before an abort still deserves a decision.
        if !loop_result.proposed_edits.is_empty() {
            let guard = self.tools.safety().guard().clone();
            let mut session = EditReviewSession::new(guard, self.approval.clone());
            let review = session.review_edits(loop_result.proposed_edits).await;
            log_review(logger, &review);
            output.push_str(&render_review(&review));
        }

        let (success, error) = match &loop_result.end {
            LoopEnd::Completed => (true, None),
            LoopEnd::IterationLimitReached => (
                false,
                Some(format!(
                    "iteration limit reached after {} iterations",
                    loop_result.iterations
                )),
            ),
            LoopEnd::LoopDetected { signature } => (
                false,
                Some(format!(
                    "assistant got stuck repeating invocation signature '{signature}'"
                )),
            ),
            LoopEnd::ProviderFailed { message } => {
                (false, Some(format!("provider error: {message}")))
            }
            LoopEnd::Cancelled => (false, Some("cancelled before completion".to_string())),
        };
        if let Some(message) = &error {
            errors.push(message.clone());
        }

        let summary = if output.trim().is_empty() {
            error.clone().unwrap_or_default()
        } else {
            summarize(&output)
        };

        SubAgentResult {
            agent: self.definition.name.clone(),
            success,
            output,
            summary,
            metadata: SubAgentMetadata {
                tokens_used: (loop_result.history_chars / CHARS_PER_TOKEN) as u64,
                duration_ms: start.elapsed().as_millis() as u64,
                tool_call_count: loop_result.tool_call_count,
                tools_used: loop_result.tools_used,
                errors,
            },
            error,
        }
    }
}

/// Render the optional file list and working directory into the loop's
/// context block.
fn render_loop_context(context: Option<&TaskContext>) -> Option<String> {
    let ctx = context?;
    let mut parts = Vec::new();
    if !ctx.files.is_empty() {
        let mut block = String::from("Relevant files:");
        for file in &ctx.files {
            block.push_str(&format!("\n- {file}"));
        }
        parts.push(block);
    }
    if let Some(cwd) = &ctx.cwd {
        parts.push(format!("Working directory: {cwd}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Disposition list appended to the output after review.
fn render_review(review: &ReviewSummary) -> String {
    let mut section = String::from("\n\n## Edits\n");
    for reviewed in &review.reviewed {
        section.push_str(&format!(
            "- {}: {}\n",
            reviewed.edit.path,
            reviewed.disposition.as_str()
        ));
    }
    section
}

fn log_review(logger: Option<&Arc<Mutex<SessionLogger>>>, review: &ReviewSummary) {
    let Some(logger) = logger else {
        return;
    };
    let mut logger = logger.lock().unwrap();
    for reviewed in &review.reviewed {
        let entry = LogEntry::EditReviewed {
            timestamp: timestamp(),
            path: reviewed.edit.path.clone(),
            disposition: reviewed.disposition.as_str().to_string(),
        };
        if let Err(e) = logger.log_event(&entry) {
            warn!(error = %e, "failed to log review disposition");
        }
    }
}

/// Bounded prefix of the output: at most [`SUMMARY_LIMIT`] bytes, cut at the
/// last line boundary inside the window, with an explicit truncation marker.
fn summarize(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= SUMMARY_LIMIT {
        return trimmed.to_string();
    }

    let mut cut = SUMMARY_LIMIT;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &trimmed[..cut];
    let head = match head.rfind('\n') {
        Some(newline) if newline > 0 => &head[..newline],
        _ => head,
    };
    format!("{}\n[summary truncated]", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::review::{ReviewDecision, StaticApproval};
    use crate::error::ProviderError;
    use crate::provider::Message;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct Scripted {
        responses: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Scripted {
                responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl crate::provider::Provider for Scripted {
        async fn chat(&self, _history: &[Message]) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::Request("script exhausted".to_string()))
        }
    }

    fn test_config(tmp: &TempDir) -> AppConfig {
        let workspace = tmp.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();
        AppConfig {
            model: "test-model".to_string(),
            provider: "test".to_string(),
            workspace,
            temperature: None,
            max_iterations: 10,
            delegate_timeout_ms: 60_000,
            shell_timeout_secs: 10,
            blocked_patterns: vec![],
            security_log_path: tmp.path().join("security.log"),
        }
    }

    fn test_tools(config: &AppConfig) -> ToolSet {
        ToolSet::with_builtins(Arc::new(crate::safety::SafetyLayer::new(config).unwrap()))
    }

    fn test_definition(name: &str) -> AgentDefinition {
        let mut definition = AgentDefinition::new(name, "a test agent");
        definition.system_prompt = "You are a focused test agent.".to_string();
        definition
    }

    fn sub_agent(
        definition: AgentDefinition,
        config: AppConfig,
        provider: Arc<dyn Provider>,
        decision: ReviewDecision,
    ) -> SubAgent {
        let tools = test_tools(&config);
        SubAgent::new(
            definition,
            config,
            provider,
            tools,
            Arc::new(StaticApproval(decision)),
            CancellationToken::new(),
        )
    }

    // ==========================================================
    // summarize
    // ==========================================================

    #[test]
    fn short_output_is_its_own_summary() {
        assert_eq!(summarize("did the thing\n"), "did the thing");
    }

    #[test]
    fn long_output_is_cut_at_a_line_boundary() {
        let mut output = String::new();
        for i in 0..60 {
            output.push_str(&format!("line number {i} with some padding\n"));
        }

        let summary = summarize(&output);
        assert!(summary.len() <= SUMMARY_LIMIT + "\n[summary truncated]".len());
        assert!(summary.ends_with("[summary truncated]"));
        let body = summary.strip_suffix("\n[summary truncated]").unwrap();
        assert!(
            body.lines().all(|l| l.starts_with("line number")),
            "no partial line in summary: {body:?}"
        );
    }

    // ==========================================================
    // execute
    // ==========================================================

    #[tokio::test]
    async fn completed_run_produces_a_success_result() {
        let tmp = TempDir::new().unwrap();
        let provider = Scripted::new(&["Reviewed everything; no problems found."]);
        let agent = sub_agent(
            test_definition("reviewer"),
            test_config(&tmp),
            provider.clone(),
            ReviewDecision::SkipAll,
        );

        assert_eq!(agent.status(), AgentStatus::Idle);
        let result = agent.execute("review the code", None).await;

        assert!(result.success);
        assert_eq!(result.agent, "reviewer");
        assert_eq!(result.output, "Reviewed everything; no problems found.");
        assert_eq!(result.summary, result.output);
        assert!(result.error.is_none());
        assert!(result.metadata.tokens_used > 0);
        assert_eq!(result.metadata.tool_call_count, 0);
        assert_eq!(agent.status(), AgentStatus::Completed);
    }

    #[tokio::test]
    async fn iteration_limit_maps_to_failure_with_last_output() {
        let tmp = TempDir::new().unwrap();
        let mut definition = test_definition("limited");
        definition.max_iterations = Some(1);

        let provider = Scripted::new(&[
            "Still working.\n<list_dir path=\".\"/>",
            "never reached",
        ]);
        let agent = sub_agent(
            definition,
            test_config(&tmp),
            provider.clone(),
            ReviewDecision::SkipAll,
        );

        let result = agent.execute("explore", None).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("iteration limit"));
        assert_eq!(result.output, "Still working.");
        assert_eq!(provider.calls(), 1, "definition budget overrides config");
        assert_eq!(agent.status(), AgentStatus::Failed);
    }

    #[tokio::test]
    async fn provider_failure_is_captured_not_propagated() {
        let tmp = TempDir::new().unwrap();
        let provider = Scripted::new(&[]);
        let agent = sub_agent(
            test_definition("doomed"),
            test_config(&tmp),
            provider,
            ReviewDecision::SkipAll,
        );

        let result = agent.execute("anything", None).await;

        assert!(!result.success);
        let error = result.error.as_deref().unwrap();
        assert!(error.contains("provider error"), "got: {error}");
        assert!(!result.metadata.errors.is_empty());
        assert_eq!(result.summary, error, "empty output falls back to the error");
    }

    #[tokio::test]
    async fn context_reaches_prompt_and_task_message() {
        let tmp = TempDir::new().unwrap();

        struct Capture {
            seen: Mutex<Vec<Message>>,
        }

        #[async_trait]
        impl crate::provider::Provider for Capture {
            async fn chat(&self, history: &[Message]) -> Result<String, ProviderError> {
                *self.seen.lock().unwrap() = history.to_vec();
                Ok("done".to_string())
            }
        }

        let provider = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
        });
        let agent = sub_agent(
            test_definition("contextual"),
            test_config(&tmp),
            provider.clone(),
            ReviewDecision::SkipAll,
        );

        let context = TaskContext {
            cwd: Some("/srv/app".to_string()),
            files: vec!["src/auth.rs".to_string(), "src/session.rs".to_string()],
            metadata: BTreeMap::from([("priority".to_string(), "high".to_string())]),
        };
        agent.execute("harden the login path", Some(&context)).await;

        let seen = provider.seen.lock().unwrap();
        let system = &seen[0].content;
        assert!(system.contains("You are a focused test agent."));
        assert!(system.contains("## Delegation Metadata"));
        assert!(system.contains("**priority**: high"));

        let task = &seen[1].content;
        assert!(task.contains("harden the login path"));
        assert!(task.contains("Relevant files:"));
        assert!(task.contains("- src/auth.rs"));
        assert!(task.contains("Working directory: /srv/app"));
    }

    #[tokio::test]
    async fn proposed_edits_are_reviewed_before_the_result_returns() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let workspace = config.workspace.clone();

        let provider = Scripted::new(&[
            "<write_file path=\"note.md\">delegated content</write_file>",
            "Wrote the note.",
        ]);
        let agent = sub_agent(
            test_definition("writer"),
            config,
            provider,
            ReviewDecision::ApplyAll,
        );

        let result = agent.execute("write a note", None).await;

        assert!(result.success);
        assert!(result.output.contains("## Edits"));
        assert!(result.output.contains("note.md: applied"));
        assert_eq!(
            std::fs::read_to_string(workspace.join("note.md")).unwrap(),
            "delegated content"
        );
    }

    #[tokio::test]
    async fn skip_all_reviews_without_touching_disk() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let workspace = config.workspace.clone();

        let provider = Scripted::new(&[
            "<write_file path=\"note.md\">unwanted</write_file>",
            "Done.",
        ]);
        let agent = sub_agent(
            test_definition("writer"),
            config,
            provider,
            ReviewDecision::SkipAll,
        );

        let result = agent.execute("write a note", None).await;

        assert!(result.output.contains("note.md: skipped"));
        assert!(!workspace.join("note.md").exists());
    }

    #[tokio::test]
    async fn repetition_abort_still_reviews_collected_edits() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let workspace = config.workspace.clone();

        // The second write targets the same path, so the loop aborts before
        // executing it; only the first round's edit exists.
        let provider = Scripted::new(&[
            "<write_file path=\"config.ini\">v1</write_file>",
            "<write_file path=\"config.ini\">v2</write_file>",
        ]);
        let agent = sub_agent(
            test_definition("stuck"),
            config,
            provider.clone(),
            ReviewDecision::ApplyAll,
        );

        let result = agent.execute("update the config", None).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("stuck repeating"));
        assert_eq!(provider.calls(), 2);
        assert!(result.output.contains("config.ini: applied"));
        assert_eq!(
            std::fs::read_to_string(workspace.join("config.ini")).unwrap(),
            "v1"
        );
        assert_eq!(agent.status(), AgentStatus::Failed);
    }

    #[tokio::test]
    async fn abort_cancels_and_marks_failed() {
        let tmp = TempDir::new().unwrap();
        let provider = Scripted::new(&["never consumed"]);
        let agent = sub_agent(
            test_definition("victim"),
            test_config(&tmp),
            provider.clone(),
            ReviewDecision::SkipAll,
        );

        agent.abort();
        assert_eq!(agent.status(), AgentStatus::Failed);

        let result = agent.execute("anything", None).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("cancelled"));
        assert_eq!(provider.calls(), 0, "cancelled before the first call");
    }
}
