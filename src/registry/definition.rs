//! Agent definition files: YAML frontmatter + system-prompt body.
//!
//! ```text
//! ---
//! name: code-reviewer
//! description: Reviews changes for defects
//! allowed-tools:
//! - read_file
//! - search_files
//! ---
//!
//! You are a careful code reviewer...
//! ```
//!
//! Parsing and serialization are inverses: a definition written by
//! [`AgentDefinition::serialize`] parses back equal, field for field, with
//! only body-edge whitespace normalized.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// A named, capability-scoped agent persona. Immutable once loaded; the
/// registry replaces whole definitions rather than patching fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    /// "inherit" means use the session's configured model.
    pub model: String,
    /// Absent means unrestricted.
    pub allowed_tools: Option<BTreeSet<String>>,
    pub enabled: bool,
    pub max_iterations: Option<u32>,
    pub temperature: Option<f32>,
    pub tags: Option<BTreeSet<String>>,
    pub version: Option<String>,
    pub author: Option<String>,
    /// The free-text body below the frontmatter.
    pub system_prompt: String,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        AgentDefinition {
            name: name.into(),
            description: description.into(),
            model: "inherit".to_string(),
            allowed_tools: None,
            enabled: true,
            max_iterations: None,
            temperature: None,
            tags: None,
            version: None,
            author: None,
            system_prompt: String::new(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.md", self.name)
    }

    pub fn inherits_model(&self) -> bool {
        self.model == "inherit"
    }

    /// Parse a definition file. `path` is only used in error reports.
    pub fn parse(content: &str, path: &Path) -> Result<Self, RegistryError> {
        if !content.starts_with("---") {
            return Err(RegistryError::ParseError {
                path: path.to_path_buf(),
                message: "missing frontmatter opening fence".to_string(),
            });
        }

        let after_open = &content[3..];
        let fence_end = after_open
            .find("\n---")
            .ok_or_else(|| RegistryError::ParseError {
                path: path.to_path_buf(),
                message: "missing frontmatter closing fence".to_string(),
            })?;

        let yaml = after_open[..fence_end].trim();
        let meta: Frontmatter =
            serde_yaml::from_str(yaml).map_err(|e| RegistryError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let name = required_field(meta.name, "name", path)?;
        let description = required_field(meta.description, "description", path)?;

        // Skip past "---" + yaml + "\n---", then the fence's own newline.
        let body_start = 3 + fence_end + 4;
        let body = if body_start < content.len() {
            content[body_start..].trim_start_matches('\n')
        } else {
            ""
        };

        Ok(AgentDefinition {
            name,
            description,
            model: meta.model,
            allowed_tools: meta.allowed_tools,
            enabled: meta.enabled,
            max_iterations: meta.max_iterations,
            temperature: meta.temperature,
            tags: meta.tags,
            version: meta.version,
            author: meta.author,
            system_prompt: body.trim_end().to_string(),
        })
    }

    /// Render the definition back to file form. Fields at their defaults
    /// (model "inherit", enabled) are omitted from the frontmatter.
    pub fn serialize(&self) -> Result<String, RegistryError> {
        let meta = Frontmatter {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            model: self.model.clone(),
            allowed_tools: self.allowed_tools.clone(),
            enabled: self.enabled,
            max_iterations: self.max_iterations,
            temperature: self.temperature,
            tags: self.tags.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
        };

        let yaml = serde_yaml::to_string(&meta).map_err(|e| RegistryError::SerializeError {
            name: self.name.clone(),
            message: e.to_string(),
        })?;

        let mut out = format!("---\n{yaml}---\n");
        if !self.system_prompt.is_empty() {
            out.push('\n');
            out.push_str(self.system_prompt.trim_end());
            out.push('\n');
        }
        Ok(out)
    }
}

fn required_field(
    value: Option<String>,
    field: &str,
    path: &Path,
) -> Result<String, RegistryError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RegistryError::MissingField {
            path: path.to_path_buf(),
            field: field.to_string(),
        }),
    }
}

/// The serde view of the metadata block. `name`/`description` are optional
/// here so their absence maps to a MissingField error instead of an opaque
/// YAML error.
#[derive(Debug, Serialize, Deserialize)]
struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "default_model", skip_serializing_if = "is_inherit")]
    model: String,
    #[serde(
        rename = "allowed-tools",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    allowed_tools: Option<BTreeSet<String>>,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    enabled: bool,
    #[serde(
        rename = "max-iterations",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
}

fn default_model() -> String {
    "inherit".to_string()
}

fn is_inherit(model: &String) -> bool {
    model == "inherit"
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}
