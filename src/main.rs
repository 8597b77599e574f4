use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio_util::sync::CancellationToken;

use cadre::agent::{
    build_system_prompt, AgentLoop, ApprovalHandler, ConsoleApproval, EditReviewSession, LogEntry,
    LoopEnd, LoopEvent, ReviewDecision, SessionLogger, StaticApproval, DEFAULT_PERSONA,
};
use cadre::cli::{AgentsCommand, Cli, Commands};
use cadre::config::{load_config, AppConfig};
use cadre::orchestration::{AgentOrchestrator, DelegateOptions};
use cadre::provider::{check_ollama_ready, GenaiProvider, Provider, RetryingProvider};
use cadre::registry::{install_builtin_agents, AgentRegistry, RegistryPaths};
use cadre::safety::SafetyLayer;
use cadre::tools::{DelegateTool, ToolSet};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::info!(model = %config.model, workspace = %config.workspace.display(), "config loaded");

    match cli.command {
        Commands::Run {
            task, apply_all, ..
        } => run_session(config, task.join(" "), apply_all).await,
        Commands::Delegate { agent, task, .. } => {
            run_delegation(config, &agent, task.join(" ")).await
        }
        Commands::Agents { command } => agents_command(&config, command),
    }
}

/// Top-level interactive session: the agent loop with the full tool set,
/// delegation enabled, and a console review of proposed edits at the end.
async fn run_session(config: AppConfig, task: String, apply_all: bool) -> anyhow::Result<()> {
    if config.provider == "ollama" {
        check_ollama_ready(&config.model).await?;
    }

    let genai = Arc::new(GenaiProvider::new(&config.model).with_temperature(config.temperature));
    let provider: Arc<dyn Provider> = Arc::new(RetryingProvider::wrap(genai));
    let safety = Arc::new(SafetyLayer::new(&config)?);
    let base_tools = ToolSet::with_builtins(safety.clone());

    let paths = RegistryPaths::discover(&config.workspace);
    match install_builtin_agents(&paths) {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, "Installed builtin agent definitions"),
        Err(e) => tracing::warn!("Builtin agent install failed: {e}"),
    }
    let registry = Arc::new(Mutex::new(AgentRegistry::load(paths)));

    let mut session_logger = SessionLogger::new(&config.workspace)?;
    session_logger.log_session_start("main", &config.model, &config.workspace, &task)?;
    let log_path = session_logger.log_path().to_path_buf();
    let logger = Arc::new(Mutex::new(session_logger));

    let root_cancel = CancellationToken::new();
    let signal_cancel = root_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling session");
            signal_cancel.cancel();
        }
    });

    let approval: Arc<dyn ApprovalHandler> = if apply_all {
        Arc::new(StaticApproval(ReviewDecision::ApplyAll))
    } else {
        Arc::new(ConsoleApproval::new())
    };

    let orchestrator = Arc::new(
        AgentOrchestrator::new(
            registry,
            provider.clone(),
            base_tools.clone(),
            approval.clone(),
            config.clone(),
            root_cancel.clone(),
        )
        .with_logger(logger.clone()),
    );

    // The delegate tool goes only on the top-level tool set; sub-agents get
    // the base set, so delegation cannot recurse.
    let mut tools = base_tools;
    tools.register(Arc::new(DelegateTool::new(orchestrator.clone())));

    let roster = {
        let agents = orchestrator.list_enabled_agents();
        if agents.is_empty() {
            None
        } else {
            Some(
                agents
                    .iter()
                    .map(|a| format!("- {}: {}", a.name, a.description))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }
    };
    let system_prompt = build_system_prompt(
        DEFAULT_PERSONA,
        &config.model,
        &config.workspace,
        &tools.prompt_descriptions(None),
        roster.as_deref(),
    );

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            render_event(event);
        }
    });

    println!("Session log: {}", log_path.display());

    let mut agent_loop = AgentLoop::new(provider, tools, system_prompt)
        .with_max_iterations(config.max_iterations)
        .with_cancellation(root_cancel.clone())
        .with_events(event_tx)
        .with_logger(logger.clone());

    let mut result = agent_loop.run(&task, None).await?;

    // Dropping the loop closes the event channel; wait for the printer to
    // flush before reviewing edits on the same terminal.
    drop(agent_loop);
    let _ = printer.await;

    let edits = std::mem::take(&mut result.proposed_edits);
    if !edits.is_empty() {
        println!("\n{} proposed edit(s) to review.", edits.len());
        let mut review =
            EditReviewSession::new(safety.guard().clone(), approval).with_apply_all(apply_all);
        let summary = review.review_edits(edits).await;
        for reviewed in &summary.reviewed {
            logger.lock().unwrap().log_event(&LogEntry::EditReviewed {
                timestamp: cadre::agent::logging::timestamp(),
                path: reviewed.edit.path.clone(),
                disposition: reviewed.disposition.as_str().to_string(),
            })?;
        }
        println!(
            "Edits: {} applied, {} skipped, {} failed",
            summary.applied(),
            summary.skipped(),
            summary.failed()
        );
    }

    match &result.end {
        LoopEnd::Completed => {}
        LoopEnd::IterationLimitReached => {
            println!("\nStopped: iteration limit ({}) reached.", config.max_iterations);
        }
        LoopEnd::LoopDetected { signature } => {
            println!("\nStopped: repeated tool invocation detected ({signature}).");
        }
        LoopEnd::ProviderFailed { message } => println!("\nStopped: provider error: {message}"),
        LoopEnd::Cancelled => println!("\nStopped: cancelled."),
    }
    tracing::info!(
        iterations = result.iterations,
        tool_calls = result.tool_call_count,
        outcome = result.end.as_str(),
        "Session finished"
    );

    Ok(())
}

/// One-shot delegation from the command line, without a surrounding loop.
async fn run_delegation(config: AppConfig, agent: &str, task: String) -> anyhow::Result<()> {
    if config.provider == "ollama" {
        check_ollama_ready(&config.model).await?;
    }

    let genai = Arc::new(GenaiProvider::new(&config.model).with_temperature(config.temperature));
    let provider: Arc<dyn Provider> = Arc::new(RetryingProvider::wrap(genai));
    let safety = Arc::new(SafetyLayer::new(&config)?);
    let tools = ToolSet::with_builtins(safety);

    let paths = RegistryPaths::discover(&config.workspace);
    if let Err(e) = install_builtin_agents(&paths) {
        tracing::warn!("Builtin agent install failed: {e}");
    }
    let registry = Arc::new(Mutex::new(AgentRegistry::load(paths)));

    let root_cancel = CancellationToken::new();
    let signal_cancel = root_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    // The `--timeout-ms` flag reaches the orchestrator through the merged
    // config, so default options suffice here.
    let orchestrator = AgentOrchestrator::new(
        registry,
        provider,
        tools,
        Arc::new(ConsoleApproval::new()),
        config.clone(),
        root_cancel,
    );

    let result = orchestrator
        .delegate_task(agent, &task, DelegateOptions::default())
        .await?;

    println!("{}", result.output);
    tracing::info!(
        agent = %result.agent,
        success = result.success,
        tokens = result.metadata.tokens_used,
        duration_ms = result.metadata.duration_ms,
        "Delegation finished"
    );
    if !result.success {
        anyhow::bail!(
            "delegation failed: {}",
            result.error.as_deref().unwrap_or("unknown failure")
        );
    }
    Ok(())
}

fn agents_command(config: &AppConfig, command: AgentsCommand) -> anyhow::Result<()> {
    let paths = RegistryPaths::discover(&config.workspace);
    if let Err(e) = install_builtin_agents(&paths) {
        tracing::warn!("Builtin agent install failed: {e}");
    }
    let registry = AgentRegistry::load(paths);

    match command {
        AgentsCommand::List { all, .. } => {
            let entries = if all {
                registry.all_agents()
            } else {
                registry.enabled_agents()
            };
            if entries.is_empty() {
                println!("No agents registered.");
                return Ok(());
            }
            for entry in entries {
                let definition = &entry.definition;
                let state = if definition.enabled { "" } else { " (disabled)" };
                println!(
                    "{:<16} [{}]{}  {}",
                    definition.name, entry.scope, state, definition.description
                );
            }
        }
        AgentsCommand::Show { name, .. } => match registry.entry(&name) {
            Some(entry) => {
                println!("# {} ({} scope)", entry.definition.name, entry.scope);
                println!("# {}", entry.source_path.display());
                println!();
                print!("{}", entry.definition.serialize()?);
            }
            None => anyhow::bail!("Unknown agent '{name}'"),
        },
    }
    Ok(())
}

fn render_event(event: LoopEvent) {
    match event {
        LoopEvent::IterationStarted { iteration } => println!("\n[iteration {iteration}]"),
        LoopEvent::Narration { text, .. } => println!("{text}"),
        LoopEvent::ToolStarted { tool, detail, .. } => println!("  -> {tool} {detail}"),
        LoopEvent::ToolFinished {
            tool,
            summary,
            is_error,
            ..
        } => {
            if is_error {
                println!("  !! {tool}: {summary}");
            } else {
                println!("  <- {tool}: {summary}");
            }
        }
        LoopEvent::EditProposed { path, .. } => println!("  ~ edit proposed: {path}"),
    }
}
