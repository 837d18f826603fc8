//! Failure paths: broken transports, panicking agents, cancellation and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use conductor_core::{AgentState, RunEventKind};
use conductor_orchestrator::{
    Agent, DegradedResponseFallback, EventNotifier, InMemoryAgentRegistry, IntervalUpdateManager,
    NoFallback, Orchestrator,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn notifier_failures_never_break_bookkeeping() {
    init_tracing();
    let registry = InMemoryAgentRegistry::new();
    registry.register(SleepAgent::new("steady", Duration::from_millis(5)));
    let notifier = Arc::new(RecordingNotifier::failing());
    let orch = Orchestrator::new(
        fast_config(),
        Arc::new(registry),
        Arc::clone(&notifier) as Arc<dyn EventNotifier>,
    );

    let result = orch
        .execute_agent(
            orch.new_context("steady", "t", "u"),
            AgentState::with_prompt("hi").shared(),
        )
        .await;

    assert!(result.success);
    assert_eq!(orch.history().len(), 1);
    let stats = orch.execution_stats();
    assert_eq!(stats.total_executions, 1);
    // started, prompt preview, agent thinking, completed
    assert_eq!(stats.notifier_failures, 4);
    assert_eq!(stats.delivery.failed, 4);
    assert_eq!(stats.concurrent_executions, 0);
}

#[tokio::test]
async fn panicking_agent_is_contained() {
    let mut config = fast_config();
    config.default_max_retries = 0;
    let (orch, notifier) = orchestrator(config, vec![Arc::new(PanicAgent) as Arc<dyn Agent>]);
    let ctx = orch.new_context("panicker", "t", "u").with_run_id("boom");
    let state = AgentState::default().shared();

    let result = orch.execute_agent(ctx, Arc::clone(&state)).await;

    assert!(result.used_fallback());
    assert_eq!(result.metadata["original_error_type"], "ExecutionError");
    assert!(result.error.as_deref().unwrap().contains("agent exploded"));
    assert!(state.read().await.final_answer.is_some());

    let events = notifier.events_for("boom", "panicker");
    assert_lifecycle(&events);
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        RunEventKind::ToolCompleted { tool, .. } if tool == "dangerous_tool"
    )));
}

#[tokio::test]
async fn panicking_agent_without_fallback_fails() {
    init_tracing();
    let registry = InMemoryAgentRegistry::new();
    registry.register(Arc::new(PanicAgent));
    let config = fast_config();
    let orch = Orchestrator::with_components(
        config.clone(),
        Arc::new(registry),
        Arc::new(RecordingNotifier::default()),
        Arc::new(IntervalUpdateManager::new(config.periodic_update_interval())),
        Arc::new(NoFallback),
    );

    let ctx = orch.new_context("panicker", "t", "u").with_max_retries(1);
    let result = orch.execute_agent(ctx, AgentState::default().shared()).await;

    assert!(!result.success);
    assert_eq!(result.error_type(), Some("FallbackExhausted"));
    assert_eq!(result.metadata["attempts"], 2);
    assert_eq!(orch.execution_stats().failed_executions, 2);
}

#[tokio::test]
async fn cancel_run_stops_only_that_run() {
    let (orch, notifier) = orchestrator(
        fast_config_with_timeout(5_000),
        vec![SleepAgent::new("long", Duration::from_secs(3))],
    );

    let target = orch.new_context("long", "t", "u").with_run_id("cancel-me");
    let bystander = orch.new_context("long", "t", "u").with_run_id("keep-me");

    let canceller = {
        let orch = orch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(orch.active_run_count(), 2);
            let cancelled = orch.cancel_run("cancel-me");
            tokio::time::sleep(Duration::from_millis(50)).await;
            let remaining = orch.active_run_count();
            orch.cancel_run("keep-me");
            (cancelled, remaining)
        })
    };

    let start = Instant::now();
    let (cancelled_result, bystander_result) = tokio::join!(
        orch.execute_agent(target, AgentState::default().shared()),
        orch.execute_agent(bystander, AgentState::default().shared()),
    );
    let (cancelled, remaining) = canceller.await.unwrap();

    assert_eq!(cancelled, 1);
    assert_eq!(remaining, 1, "the bystander was still running");
    assert!(cancelled_result.is_cancelled());
    assert_eq!(cancelled_result.error_type(), Some("Cancelled"));
    assert_eq!(cancelled_result.metadata["retry_count"], 0);
    assert!(bystander_result.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(1));

    assert_lifecycle(&notifier.events_for("cancel-me", "long"));
    assert_eq!(orch.execution_stats().cancelled_executions, 2);
    assert_eq!(orch.cancel_run("cancel-me"), 0);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_runs_and_rejects_new_ones() {
    let (orch, notifier) = orchestrator(
        fast_config_with_timeout(5_000),
        vec![SleepAgent::new("long", Duration::from_secs(3))],
    );

    let running = {
        let orch = orch.clone();
        tokio::spawn(async move {
            let ctx = orch.new_context("long", "t", "u").with_run_id("in-flight");
            orch.execute_agent(ctx, AgentState::default().shared()).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    orch.shutdown().await;
    assert!(start.elapsed() < Duration::from_secs(1));

    let result = running.await.unwrap();
    assert!(result.is_cancelled());
    assert_lifecycle(&notifier.events_for("in-flight", "long"));
    assert_eq!(orch.active_run_count(), 0);

    let late = orch
        .execute_agent(
            orch.new_context("long", "t", "u").with_run_id("too-late"),
            AgentState::default().shared(),
        )
        .await;
    assert_eq!(late.error_type(), Some("ShuttingDown"));
    assert!(notifier.events_for("too-late", "long").is_empty());

    let results = orch
        .execute_pipeline(
            &[conductor_core::PipelineStep::new("long"), conductor_core::PipelineStep::new("long")],
            orch.new_context("p", "t", "u"),
            AgentState::default().shared(),
        )
        .await;
    assert_eq!(results.len(), 1, "a rejected first step halts the pipeline");
}

#[tokio::test]
async fn dropped_run_releases_its_slot_and_completes() {
    let watched = WatchedAgent::new("watched", Duration::from_millis(300));
    let (orch, notifier) = orchestrator(
        fast_config_with_timeout(5_000),
        vec![Arc::clone(&watched) as Arc<dyn Agent>],
    );

    let ctx = orch.new_context("watched", "t", "u").with_run_id("abandoned");
    let outer = tokio::time::timeout(
        Duration::from_millis(50),
        orch.execute_agent(ctx, AgentState::default().shared()),
    )
    .await;
    assert!(outer.is_err(), "caller gave up before the agent finished");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(orch.active_run_count(), 0);
    assert_eq!(orch.cancel_run("abandoned"), 0);

    let stats = orch.execution_stats();
    assert_eq!(stats.concurrent_executions, 0);
    assert_eq!(stats.cancelled_executions, 1);
    assert_lifecycle(&notifier.events_for("abandoned", "watched"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!watched.finished(), "agent task kept running after its run was dropped");
}

#[tokio::test]
async fn run_queued_at_shutdown_is_refused_without_events() {
    let mut config = fast_config_with_timeout(5_000);
    config.max_concurrent_agents = 1;
    let (orch, notifier) = orchestrator(
        config,
        vec![SleepAgent::new("long", Duration::from_secs(3))],
    );

    let spawn_run = |run_id: &'static str| {
        let orch = orch.clone();
        tokio::spawn(async move {
            let ctx = orch.new_context("long", "t", "u").with_run_id(run_id);
            orch.execute_agent(ctx, AgentState::default().shared()).await
        })
    };
    let holder = spawn_run("holder");
    tokio::time::sleep(Duration::from_millis(30)).await;
    let queued = spawn_run("queued");
    tokio::time::sleep(Duration::from_millis(30)).await;

    orch.shutdown().await;

    let queued = queued.await.unwrap();
    assert_eq!(queued.error_type(), Some("ShuttingDown"));
    assert!(notifier.events_for("queued", "long").is_empty());

    let holder = holder.await.unwrap();
    assert!(holder.is_cancelled());
    assert_lifecycle(&notifier.events_for("holder", "long"));
    assert_eq!(orch.active_run_count(), 0);
}

#[tokio::test]
async fn many_concurrent_runs_keep_separate_streams() {
    let mut config = fast_config();
    config.max_concurrent_agents = 4;
    let agents: Vec<Arc<dyn Agent>> = vec![
        SleepAgent::new("quick", Duration::from_millis(10)),
        ToolAgent::new("tools", vec!["lookup", "compute"], false),
    ];
    let (orch, notifier) = orchestrator(config, agents);

    let mut handles = Vec::new();
    for i in 0..20 {
        let orch = orch.clone();
        let agent = if i % 2 == 0 { "quick" } else { "tools" };
        handles.push(tokio::spawn(async move {
            let ctx = orch
                .new_context(agent, format!("thread-{i}"), format!("user-{i}"))
                .with_run_id(format!("run-{i}"));
            (agent, orch.execute_agent(ctx, AgentState::default().shared()).await)
        }));
    }
    for handle in handles {
        let (agent, result) = handle.await.unwrap();
        assert!(result.success);
        let events = notifier.events_for(&result.run_id, agent);
        assert_lifecycle(&events);
        assert!(events.iter().all(|e| e.thread_id.ends_with(&result.run_id[4..])));
    }
    assert_eq!(notifier.events().iter().filter(|e| e.kind.is_terminal()).count(), 20);
}

#[tokio::test]
async fn periodic_updates_report_progress() {
    let mut config = fast_config();
    config.periodic_update_interval_ms = 30;
    config.agent_execution_timeout_ms = 1_000;
    let (orch, notifier) = orchestrator(
        config,
        vec![SleepAgent::new("steady", Duration::from_millis(200))],
    );
    let ctx = orch.new_context("steady", "t", "u").with_run_id("progress");

    orch.execute_agent(ctx, AgentState::default().shared()).await;

    let events = notifier.events_for("progress", "steady");
    assert_lifecycle(&events);
    let progress: Vec<f32> = events
        .iter()
        .filter_map(|e| match &e.kind {
            RunEventKind::AgentThinking {
                progress: Some(p), ..
            } => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.len() >= 3, "got {progress:?}");
    assert!(progress.iter().all(|p| *p <= 95.0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn degraded_fallback_preserves_agent_answer() {
    init_tracing();
    let registry = InMemoryAgentRegistry::new();
    registry.register(FailingAgent::new("broken"));
    let config = fast_config();
    let orch = Orchestrator::with_components(
        config.clone(),
        Arc::new(registry),
        Arc::new(RecordingNotifier::default()),
        Arc::new(IntervalUpdateManager::new(config.periodic_update_interval())),
        Arc::new(DegradedResponseFallback),
    );
    let state = AgentState::default().shared();
    state.write().await.final_answer = Some("half an answer".into());

    let result = orch
        .execute_agent(orch.new_context("broken", "t", "u").with_max_retries(0), Arc::clone(&state))
        .await;
    assert!(result.success);
    assert!(result.used_fallback());
    assert_eq!(state.read().await.final_answer.as_deref(), Some("half an answer"));
}

fn fast_config_with_timeout(ms: u64) -> conductor_orchestrator::OrchestratorConfig {
    let mut config = fast_config();
    config.agent_execution_timeout_ms = ms;
    config
}
