pub mod command_filter;
pub mod defaults;
pub mod workspace;

pub use workspace::WorkspaceGuard;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use command_filter::{BlockedCommand, CommandFilter};

use crate::config::AppConfig;
use crate::exec::{execute_shell, ExecResult};

/// Combined safety layer: checks commands against the blocklist, enforces
/// workspace boundaries, and delegates allowed commands to the shell
/// executor with timeout enforcement.
///
/// This is the single entry point for command execution; nothing should call
/// [`execute_shell`] directly.
pub struct SafetyLayer {
    command_filter: CommandFilter,
    workspace_guard: WorkspaceGuard,
    timeout_secs: u64,
    security_log_path: PathBuf,
}

impl SafetyLayer {
    /// Build the layer from the resolved application configuration: the
    /// filter from `blocked_patterns`, the guard from `workspace`.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let command_filter = CommandFilter::new(&config.blocked_patterns)
            .map_err(|e| anyhow::anyhow!("Failed to compile command filter patterns: {e}"))?;

        let workspace_guard = WorkspaceGuard::new(&config.workspace)
            .map_err(|e| anyhow::anyhow!("Failed to initialize workspace guard: {e}"))?;

        Ok(Self {
            command_filter,
            workspace_guard,
            timeout_secs: config.shell_timeout_secs,
            security_log_path: config.security_log_path.clone(),
        })
    }

    /// Execute a shell command through the safety pipeline.
    ///
    /// A blocked command is not an error: the agent receives a structured
    /// result with the block report as JSON in `stderr` and exit code 126,
    /// and the attempt is appended to the security log.
    pub async fn execute(&self, command: &str) -> anyhow::Result<ExecResult> {
        if let Some(blocked) = self.command_filter.check(command) {
            self.log_blocked(&blocked);
            return Ok(ExecResult {
                stdout: String::new(),
                stderr: blocked.to_json(),
                exit_code: Some(126),
                timed_out: false,
            });
        }

        let result = execute_shell(
            command,
            self.workspace_guard.canonical_root(),
            self.timeout_secs,
        )
        .await?;
        Ok(result)
    }

    pub fn workspace_root(&self) -> &Path {
        self.workspace_guard.canonical_root()
    }

    pub fn guard(&self) -> &WorkspaceGuard {
        &self.workspace_guard
    }

    /// Append one JSON line to the security log. Log failures are warnings;
    /// they never affect the command verdict.
    fn log_blocked(&self, blocked: &BlockedCommand) {
        let entry = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "blocked": true,
            "reason": blocked.reason,
            "command": blocked.command,
        });

        let write_attempt = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.security_log_path)
            .and_then(|mut file| writeln!(file, "{entry}"));

        if let Err(e) = write_attempt {
            tracing::warn!(
                path = %self.security_log_path.display(),
                error = %e,
                "failed to write security log entry"
            );
        }
    }
}
