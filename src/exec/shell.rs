//! Shell command execution with timeout enforcement.
//!
//! Commands run under `sh -c` in their own process group, with the workspace
//! as working directory. On timeout the whole group is killed, so children
//! spawned by the command cannot outlive it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::ExecError;

/// Result of a shell command execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed (timeout) rather than exiting.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Run `command` under `sh -c` with `workspace` as the working directory.
///
/// Stdout and stderr are captured in full. If the command does not finish
/// within `timeout_secs`, its process group is killed with SIGKILL and the
/// result reports `timed_out: true` with no exit code.
pub async fn execute_shell(
    command: &str,
    workspace: &Path,
    timeout_secs: u64,
) -> Result<ExecResult, ExecError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // New process group; its pgid equals the child's pid, which lets the
        // timeout path kill the command and everything it spawned.
        .process_group(0)
        // If this future is dropped mid-run (delegation timeout), the child
        // must not outlive it.
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;

    let pid = child.id();
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let run = async {
        let (stdout, stderr) = tokio::join!(drain(stdout_pipe), drain(stderr_pipe));
        let status = child.wait().await;
        (stdout, stderr, status)
    };

    match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
        Ok((stdout, stderr, status)) => {
            let status = status.map_err(|e| ExecError::ProcessFailed(e.to_string()))?;
            Ok(ExecResult {
                stdout,
                stderr,
                exit_code: status.code(),
                timed_out: false,
            })
        }
        Err(_) => {
            kill_group(pid);
            // Reap so the killed child does not linger as a zombie.
            let _ = child.wait().await;
            Ok(ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                timed_out: true,
            })
        }
    }
}

/// Read a pipe to EOF. Both pipes are drained concurrently; draining them
/// sequentially can deadlock when the child saturates the other pipe.
async fn drain(pipe: Option<impl AsyncRead + Unpin>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let pgid = Pid::from_raw(pid as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        tracing::warn!(pid, error = %e, "failed to kill timed-out process group");
    }
}
