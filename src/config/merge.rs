use super::schema::{AppConfig, PartialConfig};
use crate::safety::defaults::default_blocklist;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_DELEGATE_TIMEOUT_MS: u64 = 60_000;

impl PartialConfig {
    /// Fill the gaps in this layer from a lower-priority one. Set fields
    /// always win. `blocked_patterns` is all-or-nothing: a layer that sets
    /// it replaces the whole list from the layers below.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            model: self.model.or(fallback.model),
            provider: self.provider.or(fallback.provider),
            workspace: self.workspace.or(fallback.workspace),
            temperature: self.temperature.or(fallback.temperature),
            max_iterations: self.max_iterations.or(fallback.max_iterations),
            delegate_timeout_ms: self.delegate_timeout_ms.or(fallback.delegate_timeout_ms),
            shell_timeout_secs: self.shell_timeout_secs.or(fallback.shell_timeout_secs),
            blocked_patterns: self.blocked_patterns.or(fallback.blocked_patterns),
            security_log_path: self.security_log_path.or(fallback.security_log_path),
        }
    }

    /// Resolve into an [`AppConfig`], defaulting whatever no source set.
    pub fn finalize(self) -> AppConfig {
        let workspace = self.workspace.unwrap_or_else(|| PathBuf::from("."));
        let security_log_path = self
            .security_log_path
            .unwrap_or_else(|| workspace.join(".cadre").join("security.log"));

        AppConfig {
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            provider: self.provider.unwrap_or_else(|| "ollama".to_string()),
            workspace,
            temperature: self.temperature,
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            delegate_timeout_ms: self
                .delegate_timeout_ms
                .unwrap_or(DEFAULT_DELEGATE_TIMEOUT_MS),
            shell_timeout_secs: self.shell_timeout_secs.unwrap_or(30),
            blocked_patterns: self.blocked_patterns.unwrap_or_else(default_blocklist),
            security_log_path,
        }
    }
}
