pub mod merge;
pub mod schema;

pub use merge::{DEFAULT_DELEGATE_TIMEOUT_MS, DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL};
pub use schema::*;

use crate::cli::{Cli, Commands};
use anyhow::Context;
use std::path::Path;

/// Merge configuration sources into one resolved [`AppConfig`].
/// Precedence: CLI flags, then `<workspace>/cadre.toml`, then the global
/// `cadre.toml`, then built-in defaults. Missing files simply fall through.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let global = load_global_config();

    // Workspace path comes from the CLI or the global layer; it decides
    // where to look for the workspace config file.
    let workspace_path = cli
        .command
        .workspace()
        .or_else(|| global.workspace.clone())
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    let workspace = load_workspace_config(&workspace_path);

    // Highest-precedence source first; each fallback only fills gaps.
    let config = cli_to_partial(cli)
        .with_fallback(workspace)
        .with_fallback(global)
        .finalize();

    Ok(config)
}

fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(path) => load_toml_file(&path).unwrap_or_default(),
        None => {
            tracing::debug!("could not determine global config directory");
            PartialConfig::default()
        }
    }
}

fn load_workspace_config(workspace_path: &Path) -> PartialConfig {
    load_toml_file(&workspace_path.join("cadre.toml")).unwrap_or_default()
}

/// Read one TOML file into a PartialConfig. A missing file is the normal
/// case and yields None quietly; an unreadable or malformed file is logged
/// and then treated the same, so a bad config never takes the CLI down.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config file at {}", path.display());
            return None;
        }
        Err(e) => {
            tracing::warn!("could not read config at {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str::<ConfigFile>(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))
    {
        Ok(config_file) => {
            tracing::info!("loaded config from {}", path.display());
            Some(config_file.to_partial())
        }
        Err(e) => {
            tracing::warn!("config ignored: {:#}", e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/cadre/cadre.toml
/// macOS: ~/Library/Application Support/cadre/cadre.toml
fn global_config_path() -> Option<std::path::PathBuf> {
    directories::ProjectDirs::from("", "", "cadre")
        .map(|dirs| dirs.config_dir().join("cadre.toml"))
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    match &cli.command {
        Commands::Run {
            model,
            workspace,
            max_iterations,
            ..
        } => PartialConfig {
            model: model.clone(),
            workspace: workspace.clone(),
            max_iterations: *max_iterations,
            ..Default::default()
        },
        Commands::Delegate {
            model,
            workspace,
            timeout_ms,
            ..
        } => PartialConfig {
            model: model.clone(),
            workspace: workspace.clone(),
            delegate_timeout_ms: *timeout_ms,
            ..Default::default()
        },
        Commands::Agents { .. } => PartialConfig {
            workspace: cli.command.workspace(),
            ..Default::default()
        },
    }
}
