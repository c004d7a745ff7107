// tests/task_graph_props.rs

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use proptest::prelude::*;

use jobgrid::dag::{DependentTask, TaskGraph};
use jobgrid::engine::Task;
use jobgrid::types::Position;

// Task i may only depend on tasks 0..i, which keeps the generated graphs
// acyclic.
fn task_deps_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<BTreeSet<Position>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<u32>(), 0..4),
            num_tasks,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, candidates)| {
                    if i == 0 {
                        BTreeSet::new()
                    } else {
                        candidates.into_iter().map(|c| c % i as u32).collect()
                    }
                })
                .collect()
        })
    })
}

fn build_tasks(deps: &[BTreeSet<Position>]) -> Vec<Arc<Task>> {
    let mut tasks: Vec<Arc<Task>> = Vec::with_capacity(deps.len());
    for (i, task_deps) in deps.iter().enumerate() {
        let links = task_deps
            .iter()
            .map(|d| Arc::clone(&tasks[*d as usize]))
            .collect();
        tasks.push(Arc::new(Task::with_dependencies(i as Position, links)));
    }
    tasks
}

proptest! {
    #[test]
    fn initially_available_nodes_are_those_without_dependencies(deps in task_deps_strategy(12)) {
        let tasks = build_tasks(&deps);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();

        let expected: BTreeSet<Position> = tasks
            .iter()
            .filter(|t| t.dependencies().is_empty())
            .map(|t| t.position())
            .collect();
        prop_assert_eq!(graph.available_nodes(), &expected);
        prop_assert_eq!(graph.len(), tasks.len());
    }

    #[test]
    fn completing_available_nodes_finishes_the_graph_in_dependency_order(
        deps in task_deps_strategy(12),
        picks in proptest::collection::vec(any::<usize>(), 12),
    ) {
        let tasks = build_tasks(&deps);
        let mut graph = TaskGraph::from_tasks(&tasks).unwrap();
        let mut done: BTreeSet<Position> = BTreeSet::new();

        let mut step = 0;
        while !graph.is_done() {
            let available: Vec<Position> = graph.available_nodes().iter().copied().collect();
            prop_assert!(!available.is_empty(), "graph stalled with nodes left");

            let pick = available[picks[step % picks.len()] % available.len()];
            for dep in &deps[pick as usize] {
                prop_assert!(done.contains(dep), "task {} available before {}", pick, dep);
            }

            let released = graph.node_done(pick);
            done.insert(pick);
            for r in released {
                prop_assert!(graph.is_available(r));
                prop_assert!(deps[r as usize].iter().all(|d| done.contains(d)));
            }
            step += 1;
        }

        prop_assert_eq!(graph.done_count(), tasks.len());
        prop_assert!(graph.available_nodes().is_empty());
    }

    #[test]
    fn topological_order_lists_dependencies_first(deps in task_deps_strategy(12)) {
        let tasks = build_tasks(&deps);
        let graph = TaskGraph::from_tasks(&tasks).unwrap();

        let order = graph.topological_sort_dfs();
        prop_assert_eq!(order.len(), tasks.len());

        let rank: HashMap<Position, usize> =
            order.iter().enumerate().map(|(i, p)| (*p, i)).collect();
        for (i, task_deps) in deps.iter().enumerate() {
            for dep in task_deps {
                prop_assert!(rank[dep] < rank[&(i as Position)]);
            }
        }
    }

    #[test]
    fn wire_form_preserves_nodes_and_done_flags(
        deps in task_deps_strategy(10),
        completions in 0usize..10,
    ) {
        let tasks = build_tasks(&deps);
        let mut graph = TaskGraph::from_tasks(&tasks).unwrap();
        for _ in 0..completions {
            let Some(next) = graph.available_nodes().iter().next().copied() else {
                break;
            };
            graph.node_done(next);
        }

        let mut bytes = graph.encode().unwrap();
        let decoded = TaskGraph::decode(&mut bytes).unwrap();

        prop_assert_eq!(graph.len(), decoded.len());
        for (a, b) in graph.nodes().zip(decoded.nodes()) {
            prop_assert_eq!(a.position(), b.position());
            prop_assert_eq!(a.is_done(), b.is_done());
            prop_assert_eq!(a.dependencies(), b.dependencies());
        }
        prop_assert_eq!(graph.available_nodes(), decoded.available_nodes());
        prop_assert_eq!(graph.done_count(), decoded.done_count());
    }
}
