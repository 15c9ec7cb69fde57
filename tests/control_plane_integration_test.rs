//! End-to-end control-plane flows over an in-memory store: dispatch races,
//! fan-out/convergence over the task DAG, and failure escalation.

use std::collections::HashSet;
use std::sync::Arc;

use swarmctl::adapters::runtime::MockRuntime;
use swarmctl::context::CoreContext;
use swarmctl::domain::models::config::Config;
use swarmctl::domain::models::{AgentKind, MergeStrategy, TaskPriority, TaskStatus};
use swarmctl::domain::ports::{SystemClock, TaskRepository as _};
use swarmctl::services::coordination_engine::{CoordinationEngine, TaskSpec};
use swarmctl::services::{Dispatcher, DispatcherConfig, DispatcherMode};
use uuid::Uuid;

async fn bootstrap() -> CoreContext {
    CoreContext::bootstrap_in_memory(
        Config::default(),
        Arc::new(MockRuntime::new()),
        Arc::new(SystemClock),
    )
    .await
    .expect("in-memory context")
}

fn caps(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn dispatcher(ctx: &CoreContext, phase: &str) -> Dispatcher {
    Dispatcher::new(
        ctx.queue.clone(),
        ctx.status_manager.clone(),
        ctx.runtime.clone(),
        ctx.event_bus.clone(),
        DispatcherConfig {
            mode: DispatcherMode::InRegistry,
            phase: Some(phase.to_string()),
            ..DispatcherConfig::default()
        },
    )
}

async fn complete_task(ctx: &CoreContext, task_id: Uuid, result: serde_json::Value) {
    ctx.queue
        .update_status(task_id, TaskStatus::Running, None, None, None, None, None)
        .await
        .unwrap();
    ctx.queue
        .update_status(task_id, TaskStatus::Completed, Some(result), None, None, None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn two_dispatchers_assign_two_tasks_to_distinct_agents() {
    let ctx = bootstrap().await;
    let mut rx = ctx.event_bus.subscribe();

    for _ in 0..2 {
        let agent = ctx
            .status_manager
            .register(AgentKind::Worker, Some("build".to_string()), caps(&["bash"]), 1, vec![])
            .await
            .unwrap();
        ctx.status_manager.complete(agent.id).await.unwrap();
    }

    let ticket_id = Uuid::new_v4();
    for description in ["first", "second"] {
        ctx.queue
            .enqueue(
                ticket_id,
                Some("build".to_string()),
                "standard",
                TaskPriority::Medium,
                description,
                caps(&["bash"]),
                HashSet::new(),
                None,
                None,
                None,
            )
            .await
            .unwrap();
    }

    let first = dispatcher(&ctx, "build");
    let second = dispatcher(&ctx, "build");
    assert!(first.tick().await.unwrap());
    assert!(second.tick().await.unwrap());

    let tasks = ctx.task_repository.list_by_ticket(ticket_id).await.unwrap();
    let assignees: HashSet<Uuid> = tasks
        .iter()
        .map(|t| {
            assert_eq!(t.status, TaskStatus::Assigned);
            t.assigned_agent_id.expect("assigned")
        })
        .collect();
    assert_eq!(assignees.len(), 2, "each task went to a different agent");

    ctx.event_bus.drain_once().await.unwrap();
    let mut assigned_events = 0;
    while let Ok(event) = rx.try_recv() {
        if event.event_type() == "TASK_ASSIGNED" {
            assigned_events += 1;
        }
    }
    assert_eq!(assigned_events, 2);
}

#[tokio::test]
async fn concurrent_compare_and_set_assigns_exactly_once() {
    let ctx = bootstrap().await;
    let task = ctx
        .queue
        .enqueue(
            Uuid::new_v4(),
            None,
            "standard",
            TaskPriority::High,
            "contested",
            HashSet::new(),
            HashSet::new(),
            None,
            None,
            None,
        )
        .await
        .unwrap();

    let (a, b) = futures::future::join(
        ctx.task_repository.try_assign(task.id, Uuid::new_v4()),
        ctx.task_repository.try_assign(task.id, Uuid::new_v4()),
    )
    .await;
    let wins = [a.unwrap(), b.unwrap()].into_iter().filter(|&won| won).count();
    assert_eq!(wins, 1, "exactly one caller may win the assignment");
}

#[tokio::test]
async fn split_then_join_runs_the_whole_workflow_to_completion() {
    let ctx = bootstrap().await;
    let engine = CoordinationEngine::new(ctx.task_repository.clone(), ctx.event_bus.clone(), Arc::new(SystemClock));
    let ticket_id = Uuid::new_v4();

    let spec = |description: &str| TaskSpec {
        ticket_id,
        phase: None,
        task_type: "standard".to_string(),
        priority: TaskPriority::Medium,
        description: description.to_string(),
        required_capabilities: HashSet::new(),
        max_retries: 3,
        timeout_seconds: 600,
        execution_config: None,
    };

    let source = ctx
        .queue
        .enqueue(ticket_id, None, "standard", TaskPriority::Medium, "source", HashSet::new(), HashSet::new(), None, None, None)
        .await
        .unwrap();

    let branches = engine.split(source.id, vec![spec("left"), spec("right")]).await.unwrap();
    assert_eq!(branches.len(), 2);

    // Branches wait on the source; only the source is dispatchable.
    let ready: Vec<Uuid> = ctx
        .task_repository
        .get_ready_tasks(16)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ready, vec![source.id]);

    let agent_id = Uuid::new_v4();
    ctx.queue.assign(source.id, agent_id).await.unwrap();
    complete_task(&ctx, source.id, serde_json::json!({"seed": 1})).await;

    let ready: HashSet<Uuid> = ctx
        .task_repository
        .get_ready_tasks(16)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ready, branches.iter().map(|t| t.id).collect::<HashSet<_>>());

    for (i, branch) in branches.iter().enumerate() {
        ctx.queue.assign(branch.id, agent_id).await.unwrap();
        complete_task(&ctx, branch.id, serde_json::json!({"branch": i, "shared": "x"})).await;
    }

    let continuation = engine
        .join(branches.iter().map(|t| t.id).collect(), spec("continuation"))
        .await
        .unwrap();
    let ready: Vec<Uuid> = ctx
        .task_repository
        .get_ready_tasks(16)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ready, vec![continuation.id]);

    let merged = engine
        .merge_results(branches.iter().map(|t| t.id).collect(), MergeStrategy::Combine)
        .await
        .unwrap();
    assert_eq!(merged["shared"], serde_json::json!("x"));

    ctx.queue.assign(continuation.id, agent_id).await.unwrap();
    complete_task(&ctx, continuation.id, serde_json::Value::Object(merged)).await;

    for task in ctx.task_repository.list_by_ticket(ticket_id).await.unwrap() {
        assert_eq!(task.status, TaskStatus::Completed, "task {} finished", task.description);
    }
}
