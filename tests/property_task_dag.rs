use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use swarmctl::domain::models::{would_create_cycle, Task, TaskDag, TaskPriority};
use uuid::Uuid;

fn make_task(id: Uuid, deps: Vec<Uuid>) -> Task {
    let mut task = Task::new(
        id,
        Uuid::new_v4(),
        None,
        "standard",
        TaskPriority::Medium,
        "property test task",
        HashSet::new(),
        HashSet::new(),
        3,
        600,
        None,
        chrono::Utc::now(),
    );
    task.dependencies = deps.into_iter().collect();
    task
}

proptest! {
    /// Property: a graph where every task depends only on earlier tasks is
    /// acyclic, and topological sort places every dependency before its
    /// dependent.
    #[test]
    fn prop_backward_only_edges_never_cycle(
        size in 1usize..24,
        edge_seed in any::<u64>(),
    ) {
        let ids: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
        let mut tasks = Vec::with_capacity(size);
        for (i, &id) in ids.iter().enumerate() {
            // Deterministic pseudo-random subset of earlier tasks.
            let deps: Vec<Uuid> = (0..i)
                .filter(|j| (edge_seed >> (j % 63)) & 1 == 1)
                .map(|j| ids[j])
                .collect();
            tasks.push(make_task(id, deps));
        }

        let dag = TaskDag::from_tasks(&tasks);
        prop_assert!(!dag.has_cycle());

        let sorted = dag.topological_sort().unwrap();
        prop_assert_eq!(sorted.len(), size);
        let position: HashMap<Uuid, usize> =
            sorted.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        for task in &tasks {
            for dep in &task.dependencies {
                prop_assert!(position[dep] < position[&task.id]);
            }
        }
    }

    /// Property: execution waves partition the graph, and every task appears
    /// in a strictly later wave than all of its dependencies.
    #[test]
    fn prop_waves_respect_dependencies(size in 1usize..16) {
        let ids: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
        let tasks: Vec<Task> = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let deps = if i == 0 { vec![] } else { vec![ids[i - 1]] };
                make_task(id, deps)
            })
            .collect();

        let dag = TaskDag::from_tasks(&tasks);
        let waves = dag.execution_waves().unwrap();
        let total: usize = waves.iter().map(Vec::len).sum();
        prop_assert_eq!(total, size);

        let wave_of: HashMap<Uuid, usize> = waves
            .iter()
            .enumerate()
            .flat_map(|(w, ids)| ids.iter().map(move |&id| (id, w)))
            .collect();
        for task in &tasks {
            for dep in &task.dependencies {
                prop_assert!(wave_of[dep] < wave_of[&task.id]);
            }
        }
    }

    /// Property: closing any chain back onto its own head is always rejected,
    /// while extending the chain forward never is.
    #[test]
    fn prop_cycle_check_rejects_exactly_the_back_edges(chain_len in 2usize..20) {
        let ids: Vec<Uuid> = (0..chain_len).map(|_| Uuid::new_v4()).collect();
        let mut edges: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        for window in ids.windows(2) {
            edges.insert(window[1], HashSet::from([window[0]]));
        }

        // A fresh task depending on the tail is fine.
        let fresh = Uuid::new_v4();
        prop_assert!(!would_create_cycle(
            fresh,
            &HashSet::from([*ids.last().unwrap()]),
            &edges
        ));

        // The head depending on any later link closes the loop.
        for &later in &ids[1..] {
            prop_assert!(would_create_cycle(ids[0], &HashSet::from([later]), &edges));
        }
    }
}
