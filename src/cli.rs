use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cadre", version, about = "Coding assistant CLI with delegated sub-agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the assistant on a task in the workspace
    Run {
        /// The task, as free text
        #[arg(required = true, trailing_var_arg = true)]
        task: Vec<String>,

        /// Model name (e.g., "qwen2.5-coder:7b")
        #[arg(short, long)]
        model: Option<String>,

        /// Workspace directory path
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Maximum agent loop iterations
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Apply every proposed edit without prompting
        #[arg(long)]
        apply_all: bool,
    },
    /// Delegate a task directly to a named agent
    Delegate {
        /// Agent name from the registry
        #[arg(short, long)]
        agent: String,

        /// The task, as free text
        #[arg(required = true, trailing_var_arg = true)]
        task: Vec<String>,

        /// Delegation timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Model name override
        #[arg(short, long)]
        model: Option<String>,

        /// Workspace directory path
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
    /// Inspect the agent-definition registry
    Agents {
        #[command(subcommand)]
        command: AgentsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AgentsCommand {
    /// List resolved agents across all scopes
    List {
        /// Include disabled agents
        #[arg(long)]
        all: bool,

        /// Workspace directory path
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
    /// Print one agent definition in full
    Show {
        /// Agent name
        name: String,

        /// Workspace directory path
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
}

impl Commands {
    /// The workspace flag, regardless of which subcommand carried it.
    pub fn workspace(&self) -> Option<PathBuf> {
        match self {
            Commands::Run { workspace, .. } | Commands::Delegate { workspace, .. } => {
                workspace.clone()
            }
            Commands::Agents { command } => match command {
                AgentsCommand::List { workspace, .. } | AgentsCommand::Show { workspace, .. } => {
                    workspace.clone()
                }
            },
        }
    }
}
