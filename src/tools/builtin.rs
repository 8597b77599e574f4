//! The standard tool handlers: read_file, list_dir, search_files,
//! shell_exec.
//!
//! Reads are unrestricted (absolute paths allowed); everything that mutates
//! goes through the safety layer or the edit review flow instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;

use crate::agent::parser::ToolInvocation;
use crate::safety::SafetyLayer;
use crate::tools::{ToolHandler, ToolOutcome};

/// Reads larger than this come back truncated with a note, so one giant
/// file cannot blow out the conversation history.
const MAX_READ_BYTES: usize = 65_536;

/// search_files stops collecting after this many matching lines.
const MAX_SEARCH_MATCHES: usize = 100;

/// Files above this size are skipped during search.
const MAX_SEARCH_FILE_BYTES: u64 = 1_048_576;

pub struct ReadFileTool;

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn describe(&self) -> String {
        "\
### read_file
Read the contents of a file.
- **path** (attribute, required): file path, relative to the workspace or absolute
- Returns the file contents; very large files are truncated with a note
- Read access is unrestricted"
            .to_string()
    }

    async fn run(&self, invocation: &ToolInvocation, safety: &SafetyLayer) -> ToolOutcome {
        let Some(raw) = invocation.param("path") else {
            return ToolOutcome::error("read_file: missing required 'path' attribute");
        };
        let path = safety.guard().anchored(raw);

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => return ToolOutcome::error(format!("read_file: {raw}: {e}")),
        };

        let probe = bytes.len().min(8192);
        if bytes[..probe].contains(&0) {
            return ToolOutcome::ok(format!("(binary file: {} bytes)", bytes.len()));
        }

        let content = String::from_utf8_lossy(&bytes);
        if content.len() <= MAX_READ_BYTES {
            return ToolOutcome::ok(content.into_owned());
        }

        let mut cut = MAX_READ_BYTES;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        ToolOutcome::ok(format!(
            "{}\n[truncated: showing first {} of {} bytes]",
            &content[..cut],
            cut,
            content.len()
        ))
    }
}

pub struct ListDirTool;

#[async_trait]
impl ToolHandler for ListDirTool {
    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn describe(&self) -> String {
        "\
### list_dir
List the entries of a directory.
- **path** (attribute, optional): directory path, relative to the workspace; defaults to the workspace root
- Directories are marked with a trailing slash; entries are sorted"
            .to_string()
    }

    async fn run(&self, invocation: &ToolInvocation, safety: &SafetyLayer) -> ToolOutcome {
        let raw = invocation.param("path").unwrap_or(".");
        let path = safety.guard().anchored(raw);

        let mut read_dir = match tokio::fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) => return ToolOutcome::error(format!("list_dir: {raw}: {e}")),
        };

        let mut entries = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let is_dir = entry
                        .file_type()
                        .await
                        .map(|t| t.is_dir())
                        .unwrap_or(false);
                    entries.push(if is_dir { format!("{name}/") } else { name });
                }
                Ok(None) => break,
                Err(e) => return ToolOutcome::error(format!("list_dir: {raw}: {e}")),
            }
        }

        if entries.is_empty() {
            return ToolOutcome::ok("(empty directory)");
        }
        entries.sort();
        ToolOutcome::ok(entries.join("\n"))
    }
}

pub struct SearchFilesTool;

#[async_trait]
impl ToolHandler for SearchFilesTool {
    fn name(&self) -> &'static str {
        "search_files"
    }

    fn describe(&self) -> String {
        "\
### search_files
Search file contents under a directory with a regular expression.
- **pattern** (attribute, required): the regex to match against each line
- **path** (attribute, optional): directory to search, relative to the workspace; defaults to the workspace root
- Returns matching lines as `path:line: text`; hidden directories and files over 1 MB are skipped"
            .to_string()
    }

    async fn run(&self, invocation: &ToolInvocation, safety: &SafetyLayer) -> ToolOutcome {
        let Some(pattern) = invocation.param("pattern") else {
            return ToolOutcome::error("search_files: missing required 'pattern' attribute");
        };
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::error(format!("search_files: invalid pattern: {e}")),
        };

        let raw = invocation.param("path").unwrap_or(".");
        let root = safety.guard().anchored(raw);
        if !root.is_dir() {
            return ToolOutcome::error(format!("search_files: {raw}: not a directory"));
        }

        let mut matches = Vec::new();
        let capped = search_tree(&root, &root, &regex, &mut matches);

        if matches.is_empty() {
            return ToolOutcome::ok(format!("No matches for pattern '{pattern}'"));
        }
        let mut out = matches.join("\n");
        if capped {
            out.push_str(&format!(
                "\n[capped at {MAX_SEARCH_MATCHES} matches]"
            ));
        }
        ToolOutcome::ok(out)
    }
}

/// Depth-first walk collecting matching lines. Returns true when the match
/// cap was hit. Hidden entries and oversized or non-UTF-8 files are skipped.
fn search_tree(root: &Path, dir: &Path, regex: &Regex, matches: &mut Vec<String>) -> bool {
    let entries = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return false,
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.') && n != "target")
        })
        .collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            if search_tree(root, &path, regex, matches) {
                return true;
            }
            continue;
        }

        let small_enough = std::fs::metadata(&path)
            .map(|m| m.len() <= MAX_SEARCH_FILE_BYTES)
            .unwrap_or(false);
        if !small_enough {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };

        let display = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        for (line_no, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!("{}:{}: {}", display.display(), line_no + 1, line.trim()));
                if matches.len() >= MAX_SEARCH_MATCHES {
                    return true;
                }
            }
        }
    }
    false
}

pub struct ShellExecTool;

#[async_trait]
impl ToolHandler for ShellExecTool {
    fn name(&self) -> &'static str {
        "shell_exec"
    }

    fn describe(&self) -> String {
        "\
### shell_exec
Execute a shell command in the workspace directory.
- The tag body is the command; it runs via `sh -c` with the workspace as the working directory
- Returns JSON with stdout, stderr, exit_code, timed_out fields
- Commands are filtered against a security blocklist; blocked commands return exit_code 126"
            .to_string()
    }

    async fn run(&self, invocation: &ToolInvocation, safety: &SafetyLayer) -> ToolOutcome {
        let command = match invocation.param("command") {
            Some(cmd) => cmd.to_string(),
            None => invocation.body.clone(),
        };
        if command.trim().is_empty() {
            return ToolOutcome::error(
                "shell_exec: missing command (put it in the tag body)",
            );
        }

        match safety.execute(&command).await {
            Ok(result) => match serde_json::to_string(&result) {
                Ok(json) => ToolOutcome::ok(json),
                Err(e) => {
                    ToolOutcome::error(format!("shell_exec: failed to serialize result: {e}"))
                }
            },
            Err(e) => ToolOutcome::error(format!("shell_exec: {e}")),
        }
    }
}
