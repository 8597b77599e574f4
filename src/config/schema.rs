use serde::Deserialize;
use std::path::PathBuf;

/// The TOML file structure for cadre.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub agent: Option<AgentConfig>,
    pub safety: Option<SafetyConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub workspace: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    pub max_iterations: Option<u32>,
    pub delegate_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SafetyConfig {
    pub shell_timeout_secs: Option<u64>,
    /// Replaces the default blocklist wholesale when present.
    pub blocked_patterns: Option<Vec<BlocklistEntry>>,
    pub security_log: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocklistEntry {
    pub pattern: String,
    pub reason: String,
}

impl ConfigFile {
    /// Flatten the sectioned file into a single merge layer.
    pub fn to_partial(self) -> PartialConfig {
        let general = self.general.unwrap_or_else(|| GeneralConfig {
            model: None,
            provider: None,
            workspace: None,
            temperature: None,
        });
        let agent = self.agent.unwrap_or_else(|| AgentConfig {
            max_iterations: None,
            delegate_timeout_ms: None,
        });
        let safety = self.safety.unwrap_or_else(|| SafetyConfig {
            shell_timeout_secs: None,
            blocked_patterns: None,
            security_log: None,
        });

        PartialConfig {
            model: general.model,
            provider: general.provider,
            workspace: general.workspace.map(PathBuf::from),
            temperature: general.temperature,
            max_iterations: agent.max_iterations,
            delegate_timeout_ms: agent.delegate_timeout_ms,
            shell_timeout_secs: safety.shell_timeout_secs,
            blocked_patterns: safety
                .blocked_patterns
                .map(|entries| entries.into_iter().map(|e| (e.pattern, e.reason)).collect()),
            security_log_path: safety.security_log.map(PathBuf::from),
        }
    }
}

/// Resolved runtime configuration; every field is populated.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    /// Provider family for readiness probing ("ollama" enables the local
    /// server check; anything else skips it).
    pub provider: String,
    pub workspace: PathBuf,
    pub temperature: Option<f32>,
    /// Default agent loop budget; definitions may override per agent.
    pub max_iterations: u32,
    pub delegate_timeout_ms: u64,
    pub shell_timeout_secs: u64,
    pub blocked_patterns: Vec<(String, String)>,
    pub security_log_path: PathBuf,
}

/// One merge layer. Everything is Option so an absent field falls through
/// to the next source instead of clobbering it.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub workspace: Option<PathBuf>,
    pub temperature: Option<f32>,
    pub max_iterations: Option<u32>,
    pub delegate_timeout_ms: Option<u64>,
    pub shell_timeout_secs: Option<u64>,
    pub blocked_patterns: Option<Vec<(String, String)>>,
    pub security_log_path: Option<PathBuf>,
}
