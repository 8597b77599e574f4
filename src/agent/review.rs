//! Review and application of proposed file edits.
//!
//! The loop never writes to disk. Every `write_file` invocation becomes a
//! [`ProposedEdit`]; after the loop finishes, an [`EditReviewSession`] walks
//! the proposals in order, asks an [`ApprovalHandler`] what to do with each,
//! and applies approved ones through the workspace guard. Every proposal
//! ends up with exactly one disposition, including when an earlier decision
//! short-circuits the rest.

use std::sync::Arc;

use async_trait::async_trait;
use similar::TextDiff;
use tracing::debug;

use crate::safety::WorkspaceGuard;

/// A file write captured from the loop, pending review.
#[derive(Debug, Clone)]
pub struct ProposedEdit {
    /// Path exactly as the model proposed it, workspace-relative or absolute.
    pub path: String,
    /// On-disk content at proposal time. None means the file did not exist.
    pub old_content: Option<String>,
    pub new_content: String,
    /// Loop iteration that produced this edit.
    pub iteration: u32,
}

impl ProposedEdit {
    pub fn is_new_file(&self) -> bool {
        self.old_content.is_none()
    }

    /// Unified diff against the captured old content, or a full-content
    /// preview for new files.
    pub fn diff(&self) -> String {
        match &self.old_content {
            None => {
                let mut out = format!("new file: {}\n", self.path);
                for line in self.new_content.lines() {
                    out.push('+');
                    out.push_str(line);
                    out.push('\n');
                }
                out
            }
            Some(old) => {
                let diff = TextDiff::from_lines(old.as_str(), self.new_content.as_str());
                let mut out = format!("--- {path}\n+++ {path}\n", path = self.path);
                for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
                    out.push_str(&format!("{hunk}"));
                }
                if out.lines().count() == 2 {
                    out.push_str("(no changes)\n");
                }
                out
            }
        }
    }
}

/// What the reviewer chose for one edit. The *All variants carry forward to
/// every remaining edit in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Apply,
    Skip,
    ApplyAll,
    SkipAll,
}

/// Final outcome for one edit. An approved edit that could not be written
/// records the failure instead of being silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditDisposition {
    Applied,
    Skipped,
    ApplyFailed(String),
}

impl EditDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditDisposition::Applied => "applied",
            EditDisposition::Skipped => "skipped",
            EditDisposition::ApplyFailed(_) => "apply_failed",
        }
    }
}

#[derive(Debug)]
pub struct ReviewedEdit {
    pub edit: ProposedEdit,
    pub disposition: EditDisposition,
}

/// All dispositions from one review session, in proposal order.
#[derive(Debug, Default)]
pub struct ReviewSummary {
    pub reviewed: Vec<ReviewedEdit>,
}

impl ReviewSummary {
    pub fn applied(&self) -> usize {
        self.count(|d| matches!(d, EditDisposition::Applied))
    }

    pub fn skipped(&self) -> usize {
        self.count(|d| matches!(d, EditDisposition::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|d| matches!(d, EditDisposition::ApplyFailed(_)))
    }

    fn count(&self, pred: impl Fn(&EditDisposition) -> bool) -> usize {
        self.reviewed
            .iter()
            .filter(|r| pred(&r.disposition))
            .count()
    }
}

/// Decides the fate of each proposed edit. Implementations range from an
/// interactive console prompt to the auto-deciders used for sub-agents.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// `position` is 1-based; `total` is the session's edit count.
    async fn review(&self, edit: &ProposedEdit, position: usize, total: usize) -> ReviewDecision;
}

/// Auto-decider that gives every edit the same answer. Used for sub-agent
/// sessions running under a standing policy.
pub struct StaticApproval(pub ReviewDecision);

#[async_trait]
impl ApprovalHandler for StaticApproval {
    async fn review(&self, _edit: &ProposedEdit, _position: usize, _total: usize) -> ReviewDecision {
        self.0
    }
}

/// Walks proposed edits in order, consulting the handler and applying
/// approved edits inside the workspace.
pub struct EditReviewSession {
    guard: WorkspaceGuard,
    approval: Arc<dyn ApprovalHandler>,
    apply_all: bool,
}

impl EditReviewSession {
    pub fn new(guard: WorkspaceGuard, approval: Arc<dyn ApprovalHandler>) -> Self {
        EditReviewSession {
            guard,
            approval,
            apply_all: false,
        }
    }

    /// Start with apply-all already in effect, skipping the prompts entirely.
    pub fn with_apply_all(mut self, apply_all: bool) -> Self {
        self.apply_all = apply_all;
        self
    }

    pub async fn review_edits(&mut self, edits: Vec<ProposedEdit>) -> ReviewSummary {
        let total = edits.len();
        let mut skip_all = false;
        let mut reviewed = Vec::with_capacity(total);

        for (index, edit) in edits.into_iter().enumerate() {
            let disposition = if skip_all {
                EditDisposition::Skipped
            } else if self.apply_all {
                self.apply(&edit).await
            } else {
                match self.approval.review(&edit, index + 1, total).await {
                    ReviewDecision::Apply => self.apply(&edit).await,
                    ReviewDecision::Skip => EditDisposition::Skipped,
                    ReviewDecision::ApplyAll => {
                        self.apply_all = true;
                        self.apply(&edit).await
                    }
                    ReviewDecision::SkipAll => {
                        skip_all = true;
                        EditDisposition::Skipped
                    }
                }
            };

            debug!(path = %edit.path, disposition = disposition.as_str(), "Edit reviewed");
            reviewed.push(ReviewedEdit { edit, disposition });
        }

        ReviewSummary { reviewed }
    }

    async fn apply(&self, edit: &ProposedEdit) -> EditDisposition {
        let anchored = self.guard.anchored(&edit.path);
        let resolved = match self.guard.resolve_write(&anchored) {
            Ok(p) => p,
            Err(e) => return EditDisposition::ApplyFailed(e.to_string()),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return EditDisposition::ApplyFailed(format!(
                    "failed to create parent directories: {e}"
                ));
            }
        }
        match tokio::fs::write(&resolved, &edit.new_content).await {
            Ok(()) => EditDisposition::Applied,
            Err(e) => EditDisposition::ApplyFailed(e.to_string()),
        }
    }
}

/// Interactive reviewer that prints the diff and reads a one-letter answer
/// from stdin. Prompts are serialized through a mutex so parallel sub-agent
/// sessions cannot interleave their questions.
pub struct ConsoleApproval {
    io: tokio::sync::Mutex<()>,
}

impl ConsoleApproval {
    pub fn new() -> Self {
        ConsoleApproval {
            io: tokio::sync::Mutex::new(()),
        }
    }
}

impl Default for ConsoleApproval {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalHandler for ConsoleApproval {
    async fn review(&self, edit: &ProposedEdit, position: usize, total: usize) -> ReviewDecision {
        let _serialized = self.io.lock().await;

        let label = if edit.is_new_file() { " (new file)" } else { "" };
        println!("\nProposed edit {position}/{total}: {}{label}", edit.path);
        println!("{}", edit.diff());

        loop {
            print!("Apply this edit? [y]es / [n]o / [a]ll / [s]kip all: ");
            use std::io::Write;
            let _ = std::io::stdout().flush();

            let line = tokio::task::spawn_blocking(|| {
                let mut buf = String::new();
                std::io::stdin().read_line(&mut buf).map(|_| buf)
            })
            .await;

            let answer = match line {
                Ok(Ok(buf)) => buf.trim().to_lowercase(),
                // Stdin gone (piped input exhausted); skip is the safe answer.
                _ => return ReviewDecision::Skip,
            };

            match answer.as_str() {
                "y" | "yes" => return ReviewDecision::Apply,
                "n" | "no" => return ReviewDecision::Skip,
                "a" | "all" => return ReviewDecision::ApplyAll,
                "s" | "skip" | "skip all" => return ReviewDecision::SkipAll,
                _ => println!("Please answer y, n, a, or s."),
            }
        }
    }
}
