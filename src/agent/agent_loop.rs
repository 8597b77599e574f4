//! Core agent loop: prompt, parse, dispatch, observe, repeat.
//!
//! This is the capstone module that brings together the provider, the
//! response parser, the tool set, and the session logger into a working
//! iteration loop. Each iteration:
//!
//! 1. Sends the conversation to the provider
//! 2. Parses tool invocations out of the response text
//! 3. Aborts if the invocation signature repeats a previous iteration
//! 4. Dispatches invocations (intercepting write_file as proposed edits)
//! 5. Feeds observations back as the next user message
//!
//! A response without invocations completes the loop; the iteration budget,
//! a repeated signature, a provider failure, or cancellation end it early.
//! Tool failures are observations, not errors: the model sees them and gets
//! to react. The loop itself never writes to the filesystem.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::logging::{timestamp, LogEntry, SessionLogger};
use crate::agent::parser::{parse_response, ToolInvocation};
use crate::agent::review::ProposedEdit;
use crate::provider::{Message, Provider};
use crate::tools::{ToolKind, ToolObservation, ToolSet};

// ---------------------------------------------------------------------------
// LoopEnd / LoopResult
// ---------------------------------------------------------------------------

/// How a loop run ended. Everything except `Completed` is an early exit.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEnd {
    /// The model responded without tool invocations.
    Completed,
    /// The iteration budget ran out before the model finished.
    IterationLimitReached,
    /// An iteration repeated the exact invocation signature of an earlier
    /// one; the repeated invocations were not executed.
    LoopDetected { signature: String },
    /// The provider failed after retries were exhausted.
    ProviderFailed { message: String },
    /// The cancellation token fired.
    Cancelled,
}

impl LoopEnd {
    /// Stable outcome label for logs and status lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopEnd::Completed => "completed",
            LoopEnd::IterationLimitReached => "iteration_limit",
            LoopEnd::LoopDetected { .. } => "loop_detected",
            LoopEnd::ProviderFailed { .. } => "provider_error",
            LoopEnd::Cancelled => "cancelled",
        }
    }
}

/// Everything a caller needs to act on a finished run: the terminal state,
/// the model's last words, the pending edits, and execution metrics.
#[derive(Debug)]
pub struct LoopResult {
    pub end: LoopEnd,
    /// Final response for completed runs; otherwise the last narration the
    /// model produced before the loop ended.
    pub final_text: String,
    /// Provider calls made.
    pub iterations: u32,
    /// Captured write_file invocations, in proposal order. Nothing here has
    /// touched disk.
    pub proposed_edits: Vec<ProposedEdit>,
    pub tool_call_count: u32,
    /// Distinct tool names invoked, sorted.
    pub tools_used: Vec<String>,
    /// Non-fatal problems seen along the way (tool failures, rejected
    /// invocations).
    pub errors: Vec<String>,
    /// Total characters exchanged with the provider, for token estimation.
    pub history_chars: usize,
}

// ---------------------------------------------------------------------------
// Loop events
// ---------------------------------------------------------------------------

/// Live progress notifications. The top-level session attaches a channel and
/// renders these; sub-agents run without one.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    IterationStarted {
        iteration: u32,
    },
    Narration {
        iteration: u32,
        text: String,
    },
    ToolStarted {
        iteration: u32,
        tool: String,
        detail: String,
    },
    ToolFinished {
        iteration: u32,
        tool: String,
        summary: String,
        is_error: bool,
    },
    EditProposed {
        iteration: u32,
        path: String,
    },
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Delimiter between per-invocation entries in an iteration signature.
const SIGNATURE_DELIMITER: &str = ";";

/// Canonical signature of one iteration's invocations: `tool:path` entries
/// joined in order. Tools without a path parameter contribute an empty path,
/// so `shell_exec` iterations collapse to `shell_exec:` regardless of the
/// command. Coarse on purpose: re-running the same tool against the same
/// target is the loop shape worth catching.
fn invocation_signature(invocations: &[ToolInvocation]) -> String {
    invocations
        .iter()
        .map(|inv| format!("{}:{}", inv.tool, inv.param("path").unwrap_or("")))
        .collect::<Vec<_>>()
        .join(SIGNATURE_DELIMITER)
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Shorten a string for event payloads without splitting a character.
fn truncate_for_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// Render observations into the next user message. Each block is labeled
/// with its tool so the model can match results to invocations.
fn observation_message(observations: &[ToolObservation]) -> String {
    let mut out = String::from("Tool results:");
    for obs in observations {
        out.push_str(&format!("\n\n[{}]\n{}", obs.tool, obs.text));
    }
    out
}

// ---------------------------------------------------------------------------
// AgentLoop
// ---------------------------------------------------------------------------

/// One configured loop instance. Construct, set options, call
/// [`run`](Self::run) once.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: ToolSet,
    system_prompt: String,
    max_iterations: u32,
    allowed_tools: Option<BTreeSet<String>>,
    cancel: CancellationToken,
    event_tx: Option<UnboundedSender<LoopEvent>>,
    /// Shared with the orchestrator so delegation events land in the same
    /// session file.
    logger: Option<Arc<Mutex<SessionLogger>>>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolSet, system_prompt: String) -> Self {
        AgentLoop {
            provider,
            tools,
            system_prompt,
            max_iterations: 10,
            allowed_tools: None,
            cancel: CancellationToken::new(),
            event_tx: None,
            logger: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Restrict which tools the model may invoke. Invocations outside the
    /// set come back as rejection observations instead of executing.
    pub fn with_allowed_tools(mut self, allowed: Option<BTreeSet<String>>) -> Self {
        self.allowed_tools = allowed;
        self
    }

    /// Cooperate with an external cancellation token. The loop checks it
    /// around every await point and ends with [`LoopEnd::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_logger(mut self, logger: Arc<Mutex<SessionLogger>>) -> Self {
        self.logger = Some(logger);
        self
    }

    fn send_event(&self, event: LoopEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn log(&self, entry: &LogEntry) -> anyhow::Result<()> {
        if let Some(logger) = &self.logger {
            logger.lock().unwrap().log_event(entry)?;
        }
        Ok(())
    }

    fn permitted(&self, tool: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_none_or(|set| set.contains(tool))
    }

    /// Run the loop to a terminal state. Provider failures and aborts are
    /// reported in the result, not as `Err`; `Err` here means the session
    /// log could not be written.
    pub async fn run(&mut self, task: &str, context: Option<&str>) -> anyhow::Result<LoopResult> {
        let mut task_message = format!("## Task\n{task}");
        if let Some(ctx) = context {
            task_message.push_str(&format!("\n\n## Context\n{ctx}"));
        }

        let mut history = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(task_message.clone()),
        ];
        let mut history_chars = self.system_prompt.len() + task_message.len();

        let mut seen_signatures: HashSet<String> = HashSet::new();
        let mut iterations: u32 = 0;
        let mut tool_call_count: u32 = 0;
        let mut tools_used: BTreeSet<String> = BTreeSet::new();
        let mut errors: Vec<String> = Vec::new();
        let mut proposed_edits: Vec<ProposedEdit> = Vec::new();
        let mut final_text = String::new();
        let end;

        'session: loop {
            if self.cancel.is_cancelled() {
                end = LoopEnd::Cancelled;
                break;
            }
            // -- Iteration budget check happens before the provider call, so
            // the loop never makes more than max_iterations calls.
            if iterations >= self.max_iterations {
                end = LoopEnd::IterationLimitReached;
                break;
            }
            let iteration = iterations + 1;
            self.send_event(LoopEvent::IterationStarted { iteration });

            // -- Provider call, raced against cancellation.
            let chat_result = tokio::select! {
                _ = self.cancel.cancelled() => None,
                res = self.provider.chat(&history) => Some(res),
            };
            let Some(chat_result) = chat_result else {
                end = LoopEnd::Cancelled;
                break;
            };
            iterations = iteration;

            let response = match chat_result {
                Ok(text) => text,
                Err(e) => {
                    let message = e.to_string();
                    warn!(iteration, error = %message, "Provider call failed");
                    self.log(&LogEntry::Error {
                        timestamp: timestamp(),
                        iteration,
                        message: message.clone(),
                    })?;
                    end = LoopEnd::ProviderFailed { message };
                    break;
                }
            };
            history_chars += response.len();

            let parsed = parse_response(&response);

            if !parsed.narration.is_empty() {
                self.log(&LogEntry::Narration {
                    timestamp: timestamp(),
                    iteration,
                    content: parsed.narration.clone(),
                })?;
                self.send_event(LoopEvent::Narration {
                    iteration,
                    text: parsed.narration.clone(),
                });
                final_text = parsed.narration.clone();
            }

            // -- No invocations: the model is done.
            if !parsed.has_invocations() {
                final_text = response.trim().to_string();
                end = LoopEnd::Completed;
                break;
            }

            // -- Abort on a repeated signature before executing anything.
            let signature = invocation_signature(&parsed.invocations);
            if !seen_signatures.insert(signature.clone()) {
                debug!(signature = %signature, "Repeated invocation signature");
                self.log(&LogEntry::Error {
                    timestamp: timestamp(),
                    iteration,
                    message: format!("loop detected: repeated signature '{signature}'"),
                })?;
                end = LoopEnd::LoopDetected { signature };
                break;
            }

            history.push(Message::assistant(response.clone()));

            // -- Dispatch each invocation in document order.
            let mut observations: Vec<ToolObservation> = Vec::new();
            for invocation in &parsed.invocations {
                if self.cancel.is_cancelled() {
                    end = LoopEnd::Cancelled;
                    break 'session;
                }

                let params = serde_json::to_value(&invocation.params).unwrap_or_default();
                self.log(&LogEntry::ToolCall {
                    timestamp: timestamp(),
                    iteration,
                    tool: invocation.tool.clone(),
                    params: params.clone(),
                    body_bytes: invocation.body.len(),
                })?;
                self.send_event(LoopEvent::ToolStarted {
                    iteration,
                    tool: invocation.tool.clone(),
                    detail: truncate_for_display(&params.to_string(), 100),
                });

                tool_call_count += 1;
                tools_used.insert(invocation.tool.clone());

                let observation = if !self.permitted(&invocation.tool) {
                    let allowed = self
                        .allowed_tools
                        .as_ref()
                        .map(|set| set.iter().cloned().collect::<Vec<_>>().join(", "))
                        .unwrap_or_default();
                    ToolObservation {
                        tool: invocation.tool.clone(),
                        text: format!(
                            "Tool '{}' is not permitted for this agent. Permitted tools: {allowed}",
                            invocation.tool
                        ),
                        is_error: true,
                    }
                } else if ToolKind::classify(&invocation.tool) == ToolKind::WriteFile {
                    let (observation, edit) = self.capture_edit(invocation, iteration).await;
                    if let Some(edit) = edit {
                        self.log(&LogEntry::EditProposed {
                            timestamp: timestamp(),
                            iteration,
                            path: edit.path.clone(),
                            content_bytes: edit.new_content.len(),
                        })?;
                        self.send_event(LoopEvent::EditProposed {
                            iteration,
                            path: edit.path.clone(),
                        });
                        proposed_edits.push(edit);
                    }
                    observation
                } else {
                    self.tools.execute(invocation).await
                };

                if observation.is_error {
                    errors.push(format!("{}: {}", observation.tool, observation.text));
                }

                self.log(&LogEntry::ToolResult {
                    timestamp: timestamp(),
                    iteration,
                    tool: observation.tool.clone(),
                    result: observation.text.clone(),
                    is_error: observation.is_error,
                })?;
                self.send_event(LoopEvent::ToolFinished {
                    iteration,
                    tool: observation.tool.clone(),
                    summary: truncate_for_display(&observation.text, 200),
                    is_error: observation.is_error,
                });

                history_chars += observation.text.len();
                observations.push(observation);
            }

            // -- Feed observations back as the next user message.
            let feedback = observation_message(&observations);
            history_chars += feedback.len();
            history.push(Message::user(feedback));
        }

        if let Some(logger) = &self.logger {
            logger.lock().unwrap().log_session_end(iterations, end.as_str())?;
        }

        Ok(LoopResult {
            end,
            final_text,
            iterations,
            proposed_edits,
            tool_call_count,
            tools_used: tools_used.into_iter().collect(),
            errors,
            history_chars,
        })
    }

    /// Intercept a write_file invocation: capture the on-disk content and
    /// return a [`ProposedEdit`] instead of touching the filesystem.
    async fn capture_edit(
        &self,
        invocation: &ToolInvocation,
        iteration: u32,
    ) -> (ToolObservation, Option<ProposedEdit>) {
        let Some(path) = invocation.param("path") else {
            let observation = ToolObservation {
                tool: invocation.tool.clone(),
                text: "write_file: missing required 'path' attribute".to_string(),
                is_error: true,
            };
            return (observation, None);
        };

        let on_disk = self.tools.safety().guard().anchored(path);
        let old_content = tokio::fs::read_to_string(&on_disk).await.ok();

        let edit = ProposedEdit {
            path: path.to_string(),
            old_content,
            new_content: invocation.body.clone(),
            iteration,
        };
        let observation = ToolObservation {
            tool: invocation.tool.clone(),
            text: format!(
                "Edit to '{}' recorded for review ({} bytes). It has not been applied yet.",
                edit.path,
                edit.new_content.len()
            ),
            is_error: false,
        };
        (observation, Some(edit))
    }
}
