use regex::RegexSet;

use super::defaults::default_blocklist;

/// Matches shell commands against a compiled blocklist.
///
/// Not a security boundary: the workspace guard on writes is the primary
/// defense. This filter catches the obviously destructive patterns before
/// they reach a shell.
pub struct CommandFilter {
    patterns: RegexSet,
    reasons: Vec<String>,
}

/// Report for a command the filter refused to run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BlockedCommand {
    pub blocked: bool,
    pub reason: String,
    pub command: String,
}

impl BlockedCommand {
    /// Single-line JSON for tool observations and the security log.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"blocked\":true,\"reason\":\"{}\"}}", self.reason)
        })
    }
}

impl CommandFilter {
    /// Compile a filter from `(pattern, reason)` pairs. The patterns are
    /// compiled as one `RegexSet` so a check is a single scan.
    pub fn new(patterns: &[(String, String)]) -> Result<Self, regex::Error> {
        let (regexes, reasons): (Vec<_>, Vec<_>) = patterns.iter().cloned().unzip();
        Ok(Self {
            patterns: RegexSet::new(&regexes)?,
            reasons,
        })
    }

    pub fn from_defaults() -> Result<Self, regex::Error> {
        Self::new(&default_blocklist())
    }

    /// `Some(BlockedCommand)` when any pattern matches, with the reason of
    /// the first matching pattern. `None` means allowed.
    pub fn check(&self, command: &str) -> Option<BlockedCommand> {
        let first_match = self.patterns.matches(command).into_iter().next()?;
        Some(BlockedCommand {
            blocked: true,
            reason: self.reasons[first_match].clone(),
            command: command.to_string(),
        })
    }
}
