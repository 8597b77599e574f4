//! Delegation: routing tasks to registered agents and collecting results.
//!
//! The [`AgentOrchestrator`] owns the registry handle, the provider, the
//! base tool set, and a root [`CancellationToken`]. Each delegation builds a
//! fresh [`SubAgent`] with a child token, tracks it in a mutex-guarded
//! active-set for status polling, and races its execution against a timeout.
//! The active-set entry is removed when the delegation settles, success or
//! not, via an RAII guard, so an early return can never leak an entry.
//!
//! Lookup failures (unknown or disabled agent) are synchronous errors;
//! everything that happens after a SubAgent exists is folded into its
//! [`SubAgentResult`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::subagent::SubAgent;
use super::types::{
    AgentStatus, AgentStatusSnapshot, DelegateOptions, SubAgentResult, TaskRequest,
};
use crate::agent::logging::{timestamp, LogEntry, SessionLogger};
use crate::agent::review::ApprovalHandler;
use crate::config::AppConfig;
use crate::error::OrchestratorError;
use crate::provider::Provider;
use crate::registry::{AgentDefinition, AgentRegistry};
use crate::tools::ToolSet;

/// Running progress is reported as the share of the timeout budget consumed,
/// capped below 100 so only terminal states read as done.
const RUNNING_PROGRESS_CAP: u8 = 95;

/// Live-delegation record. The status handle is shared with the SubAgent, so
/// snapshots read its current state without touching the agent itself.
struct ActiveEntry {
    agent: String,
    task: String,
    status: Arc<Mutex<AgentStatus>>,
    cancel: CancellationToken,
    started: Instant,
    started_at: String,
    timeout_ms: u64,
}

/// Removes an active-set entry on drop. Dropping happens on every exit path
/// of `delegate_task`, including a caller dropping the future mid-flight.
struct ActiveGuard {
    active: Arc<Mutex<HashMap<String, ActiveEntry>>>,
    id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.id);
    }
}

pub struct AgentOrchestrator {
    registry: Arc<Mutex<AgentRegistry>>,
    provider: Arc<dyn Provider>,
    /// Base tool set; sub-agents receive it minus the `delegate` handler.
    tools: ToolSet,
    approval: Arc<dyn ApprovalHandler>,
    config: AppConfig,
    active: Arc<Mutex<HashMap<String, ActiveEntry>>>,
    root_cancel: CancellationToken,
    /// Top-level session log; delegation outcomes are appended when present.
    logger: Option<Arc<Mutex<SessionLogger>>>,
}

impl AgentOrchestrator {
    pub fn new(
        registry: Arc<Mutex<AgentRegistry>>,
        provider: Arc<dyn Provider>,
        tools: ToolSet,
        approval: Arc<dyn ApprovalHandler>,
        config: AppConfig,
        root_cancel: CancellationToken,
    ) -> Self {
        AgentOrchestrator {
            registry,
            provider,
            tools,
            approval,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
            root_cancel,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<Mutex<SessionLogger>>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn registry(&self) -> &Arc<Mutex<AgentRegistry>> {
        &self.registry
    }

    /// Cancel the root token; every in-flight delegation observes it at its
    /// next suspension point.
    pub fn shutdown(&self) {
        self.root_cancel.cancel();
    }

    /// Run one task on a named agent. Lookup problems surface as `Err`;
    /// execution problems (including timeout) come back inside the result.
    pub async fn delegate_task(
        &self,
        agent_name: &str,
        task: &str,
        options: DelegateOptions,
    ) -> Result<SubAgentResult, OrchestratorError> {
        let definition = self.lookup(agent_name)?;
        let timeout_ms = options
            .timeout_ms
            .unwrap_or(self.config.delegate_timeout_ms);

        let cancel = self.root_cancel.child_token();
        let sub_agent = SubAgent::new(
            definition,
            self.config.clone(),
            self.provider.clone(),
            self.tools.without("delegate"),
            self.approval.clone(),
            cancel.clone(),
        );
        let id = sub_agent.id().to_string();
        debug!(agent = agent_name, id = %id, timeout_ms, "delegating task");

        {
            let mut active = self.active.lock().unwrap();
            active.insert(
                id.clone(),
                ActiveEntry {
                    agent: agent_name.to_string(),
                    task: task.to_string(),
                    status: sub_agent.status_handle(),
                    cancel: cancel.clone(),
                    started: Instant::now(),
                    started_at: Utc::now().to_rfc3339(),
                    timeout_ms,
                },
            );
        }
        let _guard = ActiveGuard {
            active: self.active.clone(),
            id,
        };

        let started = Instant::now();
        let result = tokio::select! {
            result = sub_agent.execute(task, options.context.as_ref()) => result,
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                // The execute future is dropped here; cancelling the token
                // also stops anything it already spawned.
                sub_agent.abort();
                warn!(agent = agent_name, timeout_ms, "delegation timed out");
                SubAgentResult::failure(
                    agent_name,
                    format!("delegation to '{agent_name}' timed out after {timeout_ms} ms"),
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        info!(
            agent = agent_name,
            success = result.success,
            duration_ms = result.metadata.duration_ms,
            "delegation finished"
        );
        self.log_delegation(agent_name, task, &result);
        Ok(result)
    }

    /// Fan a batch out concurrently and wait for every entry to settle. The
    /// returned list has exactly one result per request, in request order;
    /// rejected delegations become failure results instead of errors.
    pub async fn delegate_parallel(&self, requests: Vec<TaskRequest>) -> Vec<SubAgentResult> {
        let futures = requests.into_iter().map(|request| async move {
            match self
                .delegate_task(&request.agent, &request.task, request.options)
                .await
            {
                Ok(result) => result,
                Err(e) => SubAgentResult::failure(&request.agent, e.to_string(), 0),
            }
        });
        join_all(futures).await
    }

    /// Combine a batch of results into one report: numbered successes,
    /// numbered failures, and a metrics footer.
    pub fn aggregate_results(results: &[SubAgentResult]) -> String {
        let successes: Vec<&SubAgentResult> = results.iter().filter(|r| r.success).collect();
        let failures: Vec<&SubAgentResult> = results.iter().filter(|r| !r.success).collect();

        let mut report = String::from("# Delegation Report\n");

        report.push_str(&format!("\n## Successful ({})\n", successes.len()));
        for (i, result) in successes.iter().enumerate() {
            report.push_str(&format!("{}. [{}] {}\n", i + 1, result.agent, result.summary));
        }

        report.push_str(&format!("\n## Failed ({})\n", failures.len()));
        for (i, result) in failures.iter().enumerate() {
            let reason = result.error.as_deref().unwrap_or("unknown failure");
            report.push_str(&format!("{}. [{}] {}\n", i + 1, result.agent, reason));
        }

        let tokens: u64 = results.iter().map(|r| r.metadata.tokens_used).sum();
        let duration: u64 = results.iter().map(|r| r.metadata.duration_ms).sum();
        let tool_calls: u32 = results.iter().map(|r| r.metadata.tool_call_count).sum();
        report.push_str(&format!(
            "\n## Metrics\n- tokens used: {tokens}\n- total duration: {duration} ms\n- tool calls: {tool_calls}\n"
        ));

        report
    }

    pub fn list_available_agents(&self) -> Vec<AgentDefinition> {
        self.registry
            .lock()
            .unwrap()
            .all_agents()
            .into_iter()
            .map(|entry| entry.definition.clone())
            .collect()
    }

    pub fn list_enabled_agents(&self) -> Vec<AgentDefinition> {
        self.registry
            .lock()
            .unwrap()
            .enabled_agents()
            .into_iter()
            .map(|entry| entry.definition.clone())
            .collect()
    }

    /// Snapshot one active delegation, or `None` once it has settled and
    /// left the active-set.
    pub fn get_agent_status(&self, id: &str) -> Option<AgentStatusSnapshot> {
        let active = self.active.lock().unwrap();
        active.get(id).map(|entry| snapshot(id, entry))
    }

    /// Snapshots of every in-flight delegation, ordered by start time.
    pub fn get_all_active(&self) -> Vec<AgentStatusSnapshot> {
        let active = self.active.lock().unwrap();
        let mut snapshots: Vec<AgentStatusSnapshot> = active
            .iter()
            .map(|(id, entry)| snapshot(id, entry))
            .collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        snapshots
    }

    fn lookup(&self, agent_name: &str) -> Result<AgentDefinition, OrchestratorError> {
        let registry = self.registry.lock().unwrap();
        let definition = registry
            .get(agent_name)
            .ok_or_else(|| OrchestratorError::AgentNotFound(agent_name.to_string()))?;
        if !definition.enabled {
            return Err(OrchestratorError::AgentDisabled(agent_name.to_string()));
        }
        Ok(definition.clone())
    }

    fn log_delegation(&self, agent: &str, task: &str, result: &SubAgentResult) {
        let Some(logger) = &self.logger else {
            return;
        };
        let entry = LogEntry::Delegation {
            timestamp: timestamp(),
            agent: agent.to_string(),
            task: task.to_string(),
            success: result.success,
            duration_ms: result.metadata.duration_ms,
        };
        if let Err(e) = logger.lock().unwrap().log_event(&entry) {
            warn!(error = %e, "failed to log delegation");
        }
    }
}

fn snapshot(id: &str, entry: &ActiveEntry) -> AgentStatusSnapshot {
    let status = *entry.status.lock().unwrap();
    let elapsed_ms = entry.started.elapsed().as_millis() as u64;
    AgentStatusSnapshot {
        id: id.to_string(),
        agent: entry.agent.clone(),
        task: entry.task.clone(),
        status,
        started_at: entry.started_at.clone(),
        elapsed_ms,
        progress: progress_for(status, elapsed_ms, entry.timeout_ms),
    }
}

/// Heuristic completion percentage for display. Running progress tracks how
/// much of the timeout budget has elapsed; it never reaches 100.
fn progress_for(status: AgentStatus, elapsed_ms: u64, timeout_ms: u64) -> u8 {
    match status {
        AgentStatus::Idle => 0,
        AgentStatus::Completed | AgentStatus::Failed => 100,
        AgentStatus::Running => {
            if timeout_ms == 0 {
                return RUNNING_PROGRESS_CAP;
            }
            // Cap in u64 before narrowing; the share can exceed u8::MAX.
            let share = elapsed_ms.saturating_mul(100) / timeout_ms;
            share.min(RUNNING_PROGRESS_CAP as u64) as u8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::review::{ReviewDecision, StaticApproval};
    use crate::error::ProviderError;
    use crate::provider::Message;
    use crate::registry::{AgentScope, RegistryPaths};
    use crate::safety::SafetyLayer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct Scripted {
        responses: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Scripted {
                responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        async fn chat(&self, _history: &[Message]) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::Request("script exhausted".to_string()))
        }
    }

    /// Every call sleeps, then answers. For timeout races.
    struct Slow {
        delay: Duration,
    }

    #[async_trait]
    impl Provider for Slow {
        async fn chat(&self, _history: &[Message]) -> Result<String, ProviderError> {
            tokio::time::sleep(self.delay).await;
            Ok("slow answer".to_string())
        }
    }

    fn test_config(tmp: &TempDir) -> AppConfig {
        let workspace = tmp.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();
        AppConfig {
            model: "test-model".to_string(),
            provider: "test".to_string(),
            workspace,
            temperature: None,
            max_iterations: 10,
            delegate_timeout_ms: 60_000,
            shell_timeout_secs: 10,
            blocked_patterns: vec![],
            security_log_path: tmp.path().join("security.log"),
        }
    }

    /// Registry over temp dirs, seeded with one enabled and one disabled
    /// agent.
    fn test_registry(tmp: &TempDir) -> Arc<Mutex<AgentRegistry>> {
        let paths = RegistryPaths {
            project: tmp.path().join("project-agents"),
            user: tmp.path().join("user-agents"),
            builtin: tmp.path().join("builtin-agents"),
        };
        let mut registry = AgentRegistry::new(paths);

        let mut helper = AgentDefinition::new("helper", "answers questions");
        helper.system_prompt = "You are a helper.".to_string();
        registry
            .save_agent(&helper, AgentScope::Project)
            .expect("save helper");

        let mut retired = AgentDefinition::new("retired", "no longer in service");
        retired.enabled = false;
        retired.system_prompt = "unused".to_string();
        registry
            .save_agent(&retired, AgentScope::Project)
            .expect("save retired");

        Arc::new(Mutex::new(registry))
    }

    fn orchestrator(
        tmp: &TempDir,
        provider: Arc<dyn Provider>,
    ) -> AgentOrchestrator {
        let config = test_config(tmp);
        let tools = ToolSet::with_builtins(Arc::new(SafetyLayer::new(&config).unwrap()));
        AgentOrchestrator::new(
            test_registry(tmp),
            provider,
            tools,
            Arc::new(StaticApproval(ReviewDecision::SkipAll)),
            config,
            CancellationToken::new(),
        )
    }

    fn ok_result(agent: &str, summary: &str, tokens: u64, duration: u64, calls: u32) -> SubAgentResult {
        SubAgentResult {
            agent: agent.to_string(),
            success: true,
            output: summary.to_string(),
            summary: summary.to_string(),
            metadata: crate::orchestration::types::SubAgentMetadata {
                tokens_used: tokens,
                duration_ms: duration,
                tool_call_count: calls,
                tools_used: vec![],
                errors: vec![],
            },
            error: None,
        }
    }

    // ==========================================================
    // Lookup validation
    // ==========================================================

    #[tokio::test]
    async fn unknown_agent_is_rejected_synchronously() {
        let tmp = TempDir::new().unwrap();
        let provider = Scripted::new(&["never used"]);
        let orch = orchestrator(&tmp, provider.clone());

        let err = orch
            .delegate_task("ghost", "do things", DelegateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::AgentNotFound(name) if name == "ghost"));
        assert_eq!(provider.calls(), 0);
        assert!(orch.get_all_active().is_empty());
    }

    #[tokio::test]
    async fn disabled_agent_is_rejected_synchronously() {
        let tmp = TempDir::new().unwrap();
        let provider = Scripted::new(&["never used"]);
        let orch = orchestrator(&tmp, provider.clone());

        let err = orch
            .delegate_task("retired", "do things", DelegateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::AgentDisabled(name) if name == "retired"));
        assert_eq!(provider.calls(), 0, "no sub-agent was constructed");
        assert!(orch.get_all_active().is_empty());
    }

    // ==========================================================
    // Delegation
    // ==========================================================

    #[tokio::test]
    async fn successful_delegation_returns_the_agents_result() {
        let tmp = TempDir::new().unwrap();
        let provider = Scripted::new(&["Question answered in full."]);
        let orch = orchestrator(&tmp, provider);

        let result = orch
            .delegate_task("helper", "answer the question", DelegateOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.agent, "helper");
        assert_eq!(result.output, "Question answered in full.");
        assert!(orch.get_all_active().is_empty(), "active-set cleaned up");
    }

    #[tokio::test]
    async fn timeout_resolves_before_the_execution_completes() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(Slow {
            delay: Duration::from_millis(100),
        });
        let orch = orchestrator(&tmp, provider);

        let options = DelegateOptions {
            timeout_ms: Some(1),
            ..DelegateOptions::default()
        };
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            orch.delegate_task("helper", "slow task", options),
        )
        .await
        .expect("timeout must settle promptly")
        .unwrap();

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert!(orch.get_all_active().is_empty(), "active-set cleaned up");
    }

    #[tokio::test]
    async fn parallel_returns_one_result_per_request_in_order() {
        let tmp = TempDir::new().unwrap();
        // Two tasks share the scripted provider; each consumes one response.
        let provider = Scripted::new(&["first done", "second done"]);
        let orch = orchestrator(&tmp, provider);

        let requests = vec![
            TaskRequest::new("helper", "task one"),
            TaskRequest::new("ghost", "task two"),
            TaskRequest::new("retired", "task three"),
        ];
        let results = orch.delegate_parallel(requests).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].agent, "helper");
        assert!(results[0].success);
        assert_eq!(results[1].agent, "ghost");
        assert!(!results[1].success);
        assert!(results[1].error.as_deref().unwrap().contains("Unknown agent"));
        assert_eq!(results[2].agent, "retired");
        assert!(!results[2].success);
        assert!(results[2].error.as_deref().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn one_failure_does_not_short_circuit_the_batch() {
        let tmp = TempDir::new().unwrap();
        let provider = Scripted::new(&["only response"]);
        let orch = orchestrator(&tmp, provider);

        // Second helper task exhausts the script and fails; first succeeds.
        let results = orch
            .delegate_parallel(vec![
                TaskRequest::new("helper", "a"),
                TaskRequest::new("helper", "b"),
            ])
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(
            results.iter().filter(|r| r.success).count(),
            1,
            "exactly one of the two shared-script tasks can succeed"
        );
    }

    // ==========================================================
    // Aggregation and status
    // ==========================================================

    #[test]
    fn aggregate_numbers_sections_and_sums_metrics() {
        let results = vec![
            ok_result("alpha", "built the parser", 100, 30, 2),
            SubAgentResult::failure("beta", "provider error: boom", 10),
            ok_result("gamma", "wrote the tests", 50, 20, 3),
        ];

        let report = AgentOrchestrator::aggregate_results(&results);

        assert!(report.contains("## Successful (2)"));
        assert!(report.contains("1. [alpha] built the parser"));
        assert!(report.contains("2. [gamma] wrote the tests"));
        assert!(report.contains("## Failed (1)"));
        assert!(report.contains("1. [beta] provider error: boom"));
        assert!(report.contains("- tokens used: 150"));
        assert!(report.contains("- total duration: 60 ms"));
        assert!(report.contains("- tool calls: 5"));
    }

    #[test]
    fn progress_is_zero_idle_and_hundred_terminal() {
        assert_eq!(progress_for(AgentStatus::Idle, 0, 1000), 0);
        assert_eq!(progress_for(AgentStatus::Completed, 10, 1000), 100);
        assert_eq!(progress_for(AgentStatus::Failed, 10, 1000), 100);
    }

    #[test]
    fn running_progress_tracks_the_timeout_budget() {
        assert_eq!(progress_for(AgentStatus::Running, 0, 1000), 0);
        assert_eq!(progress_for(AgentStatus::Running, 500, 1000), 50);
        assert_eq!(
            progress_for(AgentStatus::Running, 5000, 1000),
            RUNNING_PROGRESS_CAP,
            "running progress never reads as done"
        );
        // Shares past u8::MAX must still cap, not wrap.
        assert_eq!(progress_for(AgentStatus::Running, 3000, 1000), RUNNING_PROGRESS_CAP);
    }

    #[tokio::test]
    async fn status_can_be_polled_while_a_delegation_runs() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(Slow {
            delay: Duration::from_secs(30),
        });
        let orch = Arc::new(orchestrator(&tmp, provider));

        let task_orch = orch.clone();
        let handle = tokio::spawn(async move {
            task_orch
                .delegate_task("helper", "take your time", DelegateOptions::default())
                .await
        });

        // The entry appears as Idle for an instant before execution flips it
        // to Running; poll until it gets there.
        let deadline = Instant::now() + Duration::from_secs(2);
        let live = loop {
            if let Some(snap) = orch
                .get_all_active()
                .into_iter()
                .find(|s| s.status == AgentStatus::Running)
            {
                break snap;
            }
            assert!(Instant::now() < deadline, "delegation never reached Running");
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        assert_eq!(live.agent, "helper");
        assert_eq!(live.task, "take your time");
        assert!(live.progress < 100, "a running agent never reads as done");
        assert!(!live.started_at.is_empty());

        let by_id = orch.get_agent_status(&live.id).expect("id is in flight");
        assert_eq!(by_id.id, live.id);
        assert_eq!(by_id.agent, "helper");
        assert_eq!(by_id.status, AgentStatus::Running);

        assert!(orch.get_agent_status("no-such-id").is_none());

        orch.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("shutdown must unblock the delegation")
            .unwrap()
            .unwrap();

        assert!(
            orch.get_agent_status(&live.id).is_none(),
            "settled delegations leave the active-set"
        );
    }

    #[tokio::test]
    async fn listing_reads_through_to_the_registry() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, Scripted::new(&[]));

        let all: Vec<String> = orch
            .list_available_agents()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(all, vec!["helper", "retired"]);

        let enabled: Vec<String> = orch
            .list_enabled_agents()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(enabled, vec!["helper"]);
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_delegations() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(Slow {
            delay: Duration::from_secs(30),
        });
        let orch = Arc::new(orchestrator(&tmp, provider));

        let task_orch = orch.clone();
        let handle = tokio::spawn(async move {
            task_orch
                .delegate_task("helper", "hang forever", DelegateOptions::default())
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        orch.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("shutdown must unblock the delegation")
            .unwrap()
            .unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("cancelled"));
    }
}
