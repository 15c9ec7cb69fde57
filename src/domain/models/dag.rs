//! Task dependency DAG: cycle detection, topological ordering, and execution
//! waves. The queue runs [`would_create_cycle`] before every enqueue; the
//! [`TaskDag`] view backs observability over a ticket's workflow.

use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use super::task::{Task, TaskStatus};

/// One task's place in the graph.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub dependencies: HashSet<Uuid>,
    pub dependents: Vec<Uuid>,
}

/// Dependency graph over a set of tasks, usually one ticket's worth.
/// Dependencies pointing at tasks outside the set are treated as already
/// satisfied.
#[derive(Debug, Clone)]
pub struct TaskDag {
    pub nodes: HashMap<Uuid, DagNode>,
}

impl TaskDag {
    #[must_use]
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut nodes: HashMap<Uuid, DagNode> = tasks
            .iter()
            .map(|task| {
                (
                    task.id,
                    DagNode {
                        task_id: task.id,
                        status: task.status,
                        dependencies: task.dependencies.clone(),
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();

        for task in tasks {
            for dep in &task.dependencies {
                if nodes.contains_key(dep) {
                    nodes.get_mut(dep).unwrap().dependents.push(task.id);
                }
            }
        }

        Self { nodes }
    }

    /// In-set dependency count per node, the starting state for Kahn's
    /// algorithm.
    fn in_degrees(&self) -> HashMap<Uuid, usize> {
        self.nodes
            .iter()
            .map(|(&id, node)| {
                let degree = node
                    .dependencies
                    .iter()
                    .filter(|d| self.nodes.contains_key(d))
                    .count();
                (id, degree)
            })
            .collect()
    }

    #[must_use]
    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }

    /// Kahn's algorithm; errs when the queue drains before every node is
    /// placed, which means a cycle.
    pub fn topological_sort(&self) -> Result<Vec<Uuid>, DagError> {
        let mut in_degree = self.in_degrees();
        let mut queue: VecDeque<Uuid> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            sorted.push(id);
            for &dependent in &self.nodes[&id].dependents {
                let degree = in_degree.get_mut(&dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if sorted.len() == self.nodes.len() {
            Ok(sorted)
        } else {
            Err(DagError::CycleDetected)
        }
    }

    /// Groups tasks into waves of parallel-eligible work: wave zero is every
    /// task with no in-set dependencies, each later wave unlocks once the
    /// previous ones are done.
    pub fn execution_waves(&self) -> Result<Vec<Vec<Uuid>>, DagError> {
        let mut remaining: HashSet<Uuid> = self.nodes.keys().copied().collect();
        let mut satisfied: HashSet<Uuid> = HashSet::new();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let wave: Vec<Uuid> = remaining
                .iter()
                .filter(|id| {
                    self.nodes[id]
                        .dependencies
                        .iter()
                        .all(|d| satisfied.contains(d) || !self.nodes.contains_key(d))
                })
                .copied()
                .collect();

            if wave.is_empty() {
                return Err(DagError::CycleDetected);
            }
            for id in &wave {
                remaining.remove(id);
                satisfied.insert(*id);
            }
            waves.push(wave);
        }
        Ok(waves)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DagError {
    #[error("cycle detected in task dependencies")]
    CycleDetected,
}

/// The queue's cycle-rejection check: would adding a task with id `new_id`
/// and dependency set `new_deps` into a graph described by `existing_edges`
/// (task id to its dependency ids) close a cycle? Checked by
/// reverse-reachability: `new_id` must not be reachable from any of
/// `new_deps` by walking dependency edges forward, since a dependency that
/// transitively depends on the new task would close the loop.
#[must_use]
pub fn would_create_cycle(
    new_id: Uuid,
    new_deps: &HashSet<Uuid>,
    existing_edges: &HashMap<Uuid, HashSet<Uuid>>,
) -> bool {
    let mut stack: Vec<Uuid> = new_deps.iter().copied().collect();
    let mut seen: HashSet<Uuid> = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == new_id {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(deps) = existing_edges.get(&id) {
            stack.extend(deps.iter().copied());
        }
    }
    false
}
