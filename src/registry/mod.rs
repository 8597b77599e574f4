//! Discovery and storage of agent definitions.
//!
//! Definitions live as markdown files in three directories, scanned in
//! priority order: project (`.cadre/agents/` in the workspace), user
//! (platform config dir), builtin (platform data dir, seeded on first run).
//! When two scopes define the same agent name, the higher-priority file wins
//! and the rest are shadowed until it is deleted.

pub mod definition;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use directories::ProjectDirs;
use tracing::{debug, warn};

pub use definition::AgentDefinition;

use crate::error::RegistryError;

/// Where a definition file was found. Order here is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentScope {
    Project,
    User,
    Builtin,
}

impl AgentScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentScope::Project => "project",
            AgentScope::User => "user",
            AgentScope::Builtin => "builtin",
        }
    }

    pub const fn priority_order() -> [AgentScope; 3] {
        [AgentScope::Project, AgentScope::User, AgentScope::Builtin]
    }
}

impl fmt::Display for AgentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three scan roots. Built once and handed to the registry so tests can
/// point every scope at a temp directory.
#[derive(Debug, Clone)]
pub struct RegistryPaths {
    pub project: PathBuf,
    pub user: PathBuf,
    pub builtin: PathBuf,
}

impl RegistryPaths {
    /// Standard locations for a given workspace. User and builtin roots come
    /// from the platform directories; if those are unavailable they fall back
    /// under the workspace so the registry still works.
    pub fn discover(workspace: &Path) -> Self {
        let project = workspace.join(".cadre").join("agents");
        let (user, builtin) = match ProjectDirs::from("", "", "cadre") {
            Some(dirs) => (
                dirs.config_dir().join("agents"),
                dirs.data_dir().join("builtin-agents"),
            ),
            None => (
                workspace.join(".cadre").join("user-agents"),
                workspace.join(".cadre").join("builtin-agents"),
            ),
        };
        RegistryPaths {
            project,
            user,
            builtin,
        }
    }

    pub fn dir_for(&self, scope: AgentScope) -> &Path {
        match scope {
            AgentScope::Project => &self.project,
            AgentScope::User => &self.user,
            AgentScope::Builtin => &self.builtin,
        }
    }
}

/// A definition plus where it came from.
#[derive(Debug, Clone)]
pub struct AgentDiscoveryResult {
    pub definition: AgentDefinition,
    pub source_path: PathBuf,
    pub scope: AgentScope,
    pub last_modified: Option<SystemTime>,
}

/// In-memory view of every discoverable agent, keyed by name.
pub struct AgentRegistry {
    paths: RegistryPaths,
    agents: HashMap<String, AgentDiscoveryResult>,
}

impl AgentRegistry {
    /// Empty registry; call [`load_agents`](Self::load_agents) to populate.
    pub fn new(paths: RegistryPaths) -> Self {
        AgentRegistry {
            paths,
            agents: HashMap::new(),
        }
    }

    /// Construct and scan in one step.
    pub fn load(paths: RegistryPaths) -> Self {
        let mut registry = Self::new(paths);
        registry.load_agents();
        registry
    }

    pub fn paths(&self) -> &RegistryPaths {
        &self.paths
    }

    /// Rescan all three roots, replacing the in-memory view. A file that
    /// fails to parse is logged and skipped; it never aborts the scan.
    pub fn load_agents(&mut self) {
        self.agents.clear();

        for scope in AgentScope::priority_order() {
            let dir = self.paths.dir_for(scope);
            for path in definition_files(dir) {
                let content = match fs::read_to_string(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable agent file");
                        continue;
                    }
                };
                match AgentDefinition::parse(&content, &path) {
                    Ok(def) => {
                        if self.agents.contains_key(&def.name) {
                            debug!(
                                name = %def.name,
                                scope = %scope,
                                path = %path.display(),
                                "Agent shadowed by a higher-priority scope"
                            );
                            continue;
                        }
                        let last_modified =
                            fs::metadata(&path).and_then(|m| m.modified()).ok();
                        self.agents.insert(
                            def.name.clone(),
                            AgentDiscoveryResult {
                                definition: def,
                                source_path: path,
                                scope,
                                last_modified,
                            },
                        );
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping invalid agent definition");
                    }
                }
            }
        }

        debug!(count = self.agents.len(), "Agent registry loaded");
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.get(name).map(|entry| &entry.definition)
    }

    pub fn entry(&self, name: &str) -> Option<&AgentDiscoveryResult> {
        self.agents.get(name)
    }

    /// Every visible agent, sorted by name for stable listings.
    pub fn all_agents(&self) -> Vec<&AgentDiscoveryResult> {
        let mut entries: Vec<_> = self.agents.values().collect();
        entries.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        entries
    }

    pub fn enabled_agents(&self) -> Vec<&AgentDiscoveryResult> {
        self.all_agents()
            .into_iter()
            .filter(|entry| entry.definition.enabled)
            .collect()
    }

    /// Case-insensitive substring match over name, description, and tags.
    pub fn search(&self, query: &str) -> Vec<&AgentDiscoveryResult> {
        let needle = query.to_lowercase();
        self.all_agents()
            .into_iter()
            .filter(|entry| {
                let def = &entry.definition;
                def.name.to_lowercase().contains(&needle)
                    || def.description.to_lowercase().contains(&needle)
                    || def.tags.as_ref().is_some_and(|tags| {
                        tags.iter().any(|t| t.to_lowercase().contains(&needle))
                    })
            })
            .collect()
    }

    /// Write a definition into the given scope and rescan. Returns the path
    /// written. Overwrites any existing file for the same name in that scope.
    pub fn save_agent(
        &mut self,
        definition: &AgentDefinition,
        scope: AgentScope,
    ) -> Result<PathBuf, RegistryError> {
        if definition.name.trim().is_empty() {
            return Err(RegistryError::SerializeError {
                name: definition.name.clone(),
                message: "agent name is empty".to_string(),
            });
        }

        let dir = self.paths.dir_for(scope);
        fs::create_dir_all(dir)?;
        let path = dir.join(definition.file_name());
        fs::write(&path, definition.serialize()?)?;

        self.load_agents();
        Ok(path)
    }

    /// Remove a definition file from the given scope and rescan. A name that
    /// was shadowing a lower scope becomes visible from that scope again.
    pub fn delete_agent(&mut self, name: &str, scope: AgentScope) -> Result<(), RegistryError> {
        let path = self.paths.dir_for(scope).join(format!("{name}.md"));
        if !path.exists() {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
                scope: scope.as_str().to_string(),
            });
        }
        fs::remove_file(&path)?;

        self.load_agents();
        Ok(())
    }
}

/// `.md` files directly under `dir`, sorted by path. A missing directory is
/// an empty scope, not an error.
fn definition_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            debug!(dir = %dir.display(), "Agent scope directory not present");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("md")
        })
        .collect();
    files.sort();
    files
}

/// Definitions shipped with the binary. Written into the builtin scope on
/// first run so every agent, stock or custom, is a file on disk.
pub fn builtin_definitions() -> Vec<AgentDefinition> {
    let mut reviewer = AgentDefinition::new(
        "code-reviewer",
        "Reviews code changes for correctness, clarity, and risk",
    );
    reviewer.allowed_tools = Some(
        ["read_file", "list_dir", "search_files"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    reviewer.tags = Some(["quality", "review"].iter().map(|s| s.to_string()).collect());
    reviewer.system_prompt = "\
You are a meticulous code reviewer. Read the files relevant to the task and \
report concrete findings: bugs, unhandled edge cases, unclear naming, and \
missing tests. Cite the file path and line for every finding. Do not modify \
any files; your output is the review itself. If the code is sound, say so \
briefly instead of inventing problems."
        .to_string();

    let mut test_writer = AgentDefinition::new(
        "test-writer",
        "Writes focused tests for existing code",
    );
    test_writer.allowed_tools = Some(
        [
            "read_file",
            "list_dir",
            "search_files",
            "write_file",
            "shell_exec",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    test_writer.tags = Some(["quality", "testing"].iter().map(|s| s.to_string()).collect());
    test_writer.system_prompt = "\
You write tests for existing code. Read the code under test first, then add \
tests that pin down its observable behavior, including edge cases and error \
paths. Follow the naming and layout conventions already present in the \
project. Run the test suite when a test runner is available and report the \
outcome."
        .to_string();

    let mut doc_writer = AgentDefinition::new(
        "doc-writer",
        "Writes and updates documentation for code and tools",
    );
    doc_writer.allowed_tools = Some(
        ["read_file", "list_dir", "search_files", "write_file"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    doc_writer.tags = Some(["docs"].iter().map(|s| s.to_string()).collect());
    doc_writer.system_prompt = "\
You write documentation. Read the code you are documenting before writing a \
word, and describe what it actually does rather than what its names suggest. \
Prefer short sections, concrete examples, and exact command lines. Update \
existing documents in place; create new ones only when no sensible home \
exists."
        .to_string();

    vec![reviewer, test_writer, doc_writer]
}

/// Seed the builtin scope with stock definitions. Existing files are left
/// untouched so user edits to builtins survive restarts. Returns how many
/// files were written.
pub fn install_builtin_agents(paths: &RegistryPaths) -> Result<usize, RegistryError> {
    fs::create_dir_all(&paths.builtin)?;

    let mut written = 0;
    for def in builtin_definitions() {
        let path = paths.builtin.join(def.file_name());
        if path.exists() {
            continue;
        }
        fs::write(&path, def.serialize()?)?;
        written += 1;
    }

    if written > 0 {
        debug!(count = written, dir = %paths.builtin.display(), "Seeded builtin agents");
    }
    Ok(written)
}
