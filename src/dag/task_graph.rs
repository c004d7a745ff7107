// src/dag/task_graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, trace};

use crate::dag::visit::{TaskNodeVisitor, VisitResult};
use crate::errors::{JobGridError, Result};
use crate::types::Position;

/// Anything that can be placed in a [`TaskGraph`]: it has a position in its
/// job and optionally declares the tasks it depends on.
pub trait DependentTask: Sized {
    fn position(&self) -> Position;

    fn dependencies(&self) -> &[Arc<Self>];
}

/// A task in the graph: its position, whether it is done (completed or
/// cancelled), and the positions of the tasks it depends on.
///
/// Equality is by position only.
#[derive(Debug, Clone)]
pub struct TaskNode {
    position: Position,
    done: bool,
    dependencies: Vec<Position>,
}

impl TaskNode {
    pub fn new(position: Position, done: bool, dependencies: Vec<Position>) -> Self {
        Self {
            position,
            done,
            dependencies,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Positions of the tasks this one depends on, in declaration order.
    pub fn dependencies(&self) -> &[Position] {
        &self.dependencies
    }
}

impl PartialEq for TaskNode {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
    }
}

impl Eq for TaskNode {}

/// The "depends on" relationships between the tasks of one job.
///
/// Tasks are identified by their position in the job. The graph is a DAG and
/// only ever moves forward: nodes become done through [`TaskGraph::node_done`]
/// and are never removed individually.
///
/// Not internally synchronized: the owner must serialize `node_done` against
/// reads of [`TaskGraph::available_nodes`] for the same instance.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: BTreeMap<Position, TaskNode>,
    not_done: BTreeSet<Position>,
    /// position -> positions of the nodes that depend on it.
    dependants: HashMap<Position, Vec<Position>>,
    /// position -> positions of its dependencies that are not done yet.
    remaining: HashMap<Position, HashSet<Position>>,
    /// Not-done nodes without remaining dependencies.
    available: BTreeSet<Position>,
    done_count: usize,
}

impl TaskGraph {
    /// Build the graph of a set of tasks by walking their declared
    /// dependencies.
    ///
    /// A task reachable through several paths yields a single node. Tasks
    /// only reachable as dependencies are included too.
    pub fn from_tasks<T: DependentTask>(tasks: &[Arc<T>]) -> Result<Self> {
        let mut working: HashMap<Position, TaskNode> = HashMap::with_capacity(tasks.len());
        let mut in_progress: HashSet<Position> = HashSet::new();

        for task in tasks {
            collect_node(task, &mut working, &mut in_progress)?;
        }

        Ok(Self::build(working.into_values()))
    }

    /// Build the graph from already materialized nodes.
    ///
    /// Fails if a node depends on a position that is not in the set, or if
    /// the dependencies form a cycle.
    pub fn from_nodes(nodes: impl IntoIterator<Item = TaskNode>) -> Result<Self> {
        let nodes: Vec<TaskNode> = nodes.into_iter().collect();
        let positions: HashSet<Position> = nodes.iter().map(|n| n.position).collect();

        let mut check: DiGraphMap<Position, ()> = DiGraphMap::new();
        for node in &nodes {
            check.add_node(node.position);
            for dep in &node.dependencies {
                if !positions.contains(dep) {
                    return Err(JobGridError::IllegalState(format!(
                        "task {} depends on unknown position {}",
                        node.position, dep
                    )));
                }
                check.add_edge(*dep, node.position, ());
            }
        }

        if let Err(cycle) = toposort(&check, None) {
            return Err(JobGridError::TaskCycle(cycle.node_id()));
        }

        Ok(Self::build(nodes))
    }

    fn build(nodes: impl IntoIterator<Item = TaskNode>) -> Self {
        let nodes: BTreeMap<Position, TaskNode> =
            nodes.into_iter().map(|n| (n.position, n)).collect();

        let mut graph = TaskGraph {
            not_done: BTreeSet::new(),
            dependants: HashMap::new(),
            remaining: HashMap::new(),
            available: BTreeSet::new(),
            done_count: 0,
            nodes: BTreeMap::new(),
        };

        for (&pos, node) in &nodes {
            for dep in &node.dependencies {
                graph.dependants.entry(*dep).or_default().push(pos);
                let dep_done = nodes.get(dep).is_some_and(|d| d.done);
                if !dep_done {
                    graph.remaining.entry(pos).or_default().insert(*dep);
                }
            }

            if node.done {
                graph.done_count += 1;
            } else {
                graph.not_done.insert(pos);
                if !graph.remaining.contains_key(&pos) {
                    graph.available.insert(pos);
                }
            }
        }

        graph.nodes = nodes;
        debug!(graph = %graph, "task graph built");
        graph
    }

    /// The node at `position`, if any.
    pub fn node_at(&self, position: Position) -> Option<&TaskNode> {
        self.nodes.get(&position)
    }

    /// All nodes, ordered by position.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    /// Mark the task at `position` as done (completed or cancelled).
    ///
    /// Returns the positions that became available as a result. Unknown or
    /// already done positions are a no-op.
    pub fn node_done(&mut self, position: Position) -> Vec<Position> {
        let Some(node) = self.nodes.get_mut(&position) else {
            return Vec::new();
        };
        if node.done {
            return Vec::new();
        }

        node.done = true;
        self.done_count += 1;
        self.available.remove(&position);
        self.not_done.remove(&position);

        let mut released = Vec::new();
        if let Some(dependants) = self.dependants.get(&position) {
            for &dependant in dependants {
                let now_free = match self.remaining.get_mut(&dependant) {
                    Some(pending) => {
                        pending.remove(&position);
                        pending.is_empty()
                    }
                    None => false,
                };
                if now_free {
                    self.remaining.remove(&dependant);
                    if self.not_done.contains(&dependant) && self.available.insert(dependant) {
                        released.push(dependant);
                    }
                }
            }
        }

        trace!(position, ?released, done = self.done_count, "task node done");
        released
    }

    /// Not-done tasks whose dependencies are all done.
    ///
    /// A position stays in this set until it is itself marked done.
    pub fn available_nodes(&self) -> &BTreeSet<Position> {
        &self.available
    }

    pub fn is_available(&self, position: Position) -> bool {
        self.available.contains(&position)
    }

    /// Whether every task in the graph is done.
    pub fn is_done(&self) -> bool {
        self.done_count >= self.nodes.len()
    }

    pub fn done_count(&self) -> usize {
        self.done_count
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether at least one task depends on the task at `position`.
    pub fn is_depended_on(&self, position: Position) -> bool {
        self.dependants
            .get(&position)
            .is_some_and(|d| !d.is_empty())
    }

    /// Depth-first visit of every node, done or not.
    ///
    /// Returns [`VisitResult::Stop`] if the visitor aborted the traversal.
    pub fn start_visit<V: TaskNodeVisitor>(&self, visitor: &mut V) -> VisitResult {
        self.visit_roots(self.nodes.keys().copied(), visitor, true)
    }

    /// Depth-first visit restricted to nodes that are not done.
    pub fn start_visit_not_done<V: TaskNodeVisitor>(&self, visitor: &mut V) -> VisitResult {
        self.visit_roots(self.not_done.iter().copied(), visitor, false)
    }

    fn visit_roots<V: TaskNodeVisitor>(
        &self,
        roots: impl Iterator<Item = Position>,
        visitor: &mut V,
        visit_done: bool,
    ) -> VisitResult {
        let mut visited: HashSet<Position> = HashSet::new();

        for pos in roots {
            let Some(node) = self.nodes.get(&pos) else {
                continue;
            };
            if node.done && !visit_done {
                continue;
            }
            if self.visit_node(node, visitor, visit_done, &mut visited) == VisitResult::Stop {
                return VisitResult::Stop;
            }
        }

        VisitResult::Continue
    }

    fn visit_node<V: TaskNodeVisitor>(
        &self,
        node: &TaskNode,
        visitor: &mut V,
        visit_done: bool,
        visited: &mut HashSet<Position>,
    ) -> VisitResult {
        if visited.contains(&node.position) {
            return VisitResult::Continue;
        }

        visitor.pre_visit(node);
        visited.insert(node.position);

        match visitor.visit(node) {
            VisitResult::Stop => return VisitResult::Stop,
            VisitResult::Skip => return VisitResult::Continue,
            VisitResult::Continue => {}
        }

        for dep in &node.dependencies {
            let Some(child) = self.nodes.get(dep) else {
                continue;
            };
            if child.done && !visit_done {
                continue;
            }
            if self.visit_node(child, visitor, visit_done, visited) == VisitResult::Stop {
                return VisitResult::Stop;
            }
        }

        visitor.post_visit(node);
        VisitResult::Continue
    }

    /// Positions of the not-done tasks in dependency order: every position
    /// comes after all of its not-done dependencies.
    pub fn topological_sort_dfs(&self) -> Vec<Position> {
        let mut visitor = TopologicalOrder {
            pending: self.not_done.clone(),
            order: Vec::with_capacity(self.not_done.len()),
        };

        while !visitor.pending.is_empty() {
            let before = visitor.pending.len();
            self.start_visit_not_done(&mut visitor);
            if visitor.pending.len() == before {
                break;
            }
        }

        visitor.order
    }
}

impl fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TaskGraph[nodes={}, done={}, with_dependants={}, with_dependencies={}, available={}]",
            self.nodes.len(),
            self.done_count,
            self.dependants.len(),
            self.remaining.len(),
            self.available.len()
        )
    }
}

/// Post-order collector used by [`TaskGraph::topological_sort_dfs`].
struct TopologicalOrder {
    pending: BTreeSet<Position>,
    order: Vec<Position>,
}

impl TaskNodeVisitor for TopologicalOrder {
    fn visit(&mut self, node: &TaskNode) -> VisitResult {
        if node.is_done() || !self.pending.contains(&node.position()) {
            VisitResult::Skip
        } else {
            VisitResult::Continue
        }
    }

    fn post_visit(&mut self, node: &TaskNode) {
        if self.pending.remove(&node.position()) {
            self.order.push(node.position());
        }
    }
}

fn collect_node<T: DependentTask>(
    task: &Arc<T>,
    working: &mut HashMap<Position, TaskNode>,
    in_progress: &mut HashSet<Position>,
) -> Result<Position> {
    let pos = task.position();
    if working.contains_key(&pos) {
        return Ok(pos);
    }
    if !in_progress.insert(pos) {
        return Err(JobGridError::TaskCycle(pos));
    }

    let mut deps = Vec::with_capacity(task.dependencies().len());
    for dep in task.dependencies() {
        deps.push(collect_node(dep, working, in_progress)?);
    }

    in_progress.remove(&pos);
    working.insert(pos, TaskNode::new(pos, false, deps));
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct T {
        pos: Position,
        deps: Vec<Arc<T>>,
    }

    impl DependentTask for T {
        fn position(&self) -> Position {
            self.pos
        }

        fn dependencies(&self) -> &[Arc<Self>] {
            &self.deps
        }
    }

    fn task(pos: Position, deps: &[&Arc<T>]) -> Arc<T> {
        Arc::new(T {
            pos,
            deps: deps.iter().map(|d| Arc::clone(d)).collect(),
        })
    }

    /// 0 <- 1, 0 <- 2, {1, 2} <- 3
    fn diamond() -> TaskGraph {
        let t0 = task(0, &[]);
        let t1 = task(1, &[&t0]);
        let t2 = task(2, &[&t0]);
        let t3 = task(3, &[&t1, &t2]);
        TaskGraph::from_tasks(&[t0, t1, t2, t3]).unwrap()
    }

    #[test]
    fn diamond_yields_single_shared_node() {
        let g = diamond();
        assert_eq!(g.len(), 4);
        assert_eq!(g.available_nodes().iter().copied().collect::<Vec<_>>(), vec![0]);
        assert!(g.is_depended_on(0));
        assert!(!g.is_depended_on(3));
    }

    #[test]
    fn dependencies_reachable_only_by_descent_are_included() {
        let t0 = task(0, &[]);
        let t1 = task(1, &[&t0]);
        let g = TaskGraph::from_tasks(&[t1]).unwrap();
        assert_eq!(g.len(), 2);
        assert!(g.node_at(0).is_some());
    }

    #[test]
    fn node_done_releases_dependants_when_last_dependency_finishes() {
        let mut g = diamond();

        assert_eq!(g.node_done(0), vec![1, 2]);
        assert_eq!(g.node_done(1), Vec::<Position>::new());
        assert!(!g.is_available(3));
        assert_eq!(g.node_done(2), vec![3]);
        assert!(g.is_available(3));
        g.node_done(3);

        assert!(g.is_done());
        assert!(g.available_nodes().is_empty());
        assert_eq!(g.done_count(), 4);
    }

    #[test]
    fn node_done_is_idempotent_and_ignores_unknown_positions() {
        let mut g = diamond();
        g.node_done(0);
        g.node_done(0);
        g.node_done(42);
        assert_eq!(g.done_count(), 1);
    }

    #[test]
    fn cyclic_task_declarations_are_rejected() {
        let nodes = vec![
            TaskNode::new(0, false, vec![1]),
            TaskNode::new(1, false, vec![0]),
        ];
        assert!(matches!(
            TaskGraph::from_nodes(nodes),
            Err(JobGridError::TaskCycle(_))
        ));
    }

    #[test]
    fn prebuilt_done_nodes_count_towards_completion() {
        let nodes = vec![
            TaskNode::new(0, true, vec![]),
            TaskNode::new(1, false, vec![0]),
        ];
        let g = TaskGraph::from_nodes(nodes).unwrap();
        assert_eq!(g.done_count(), 1);
        assert!(g.is_available(1));
    }

    #[test]
    fn topological_order_skips_done_nodes() {
        let mut g = diamond();
        g.node_done(0);
        let order = g.topological_sort_dfs();
        assert_eq!(order.len(), 3);
        assert_eq!(order.last(), Some(&3));
        assert!(!order.contains(&0));
    }

    struct StopAt {
        stop_at: Position,
        seen: Vec<Position>,
    }

    impl TaskNodeVisitor for StopAt {
        fn visit(&mut self, node: &TaskNode) -> VisitResult {
            self.seen.push(node.position());
            if node.position() == self.stop_at {
                VisitResult::Stop
            } else {
                VisitResult::Continue
            }
        }
    }

    #[test]
    fn stop_aborts_the_whole_traversal() {
        let g = diamond();
        let mut v = StopAt {
            stop_at: 0,
            seen: Vec::new(),
        };
        assert_eq!(g.start_visit(&mut v), VisitResult::Stop);
        // root 0 is visited first (ordered roots) and stops everything.
        assert_eq!(v.seen, vec![0]);
    }

    struct SkipAll {
        visited: Vec<Position>,
        post: Vec<Position>,
    }

    impl TaskNodeVisitor for SkipAll {
        fn visit(&mut self, node: &TaskNode) -> VisitResult {
            self.visited.push(node.position());
            VisitResult::Skip
        }

        fn post_visit(&mut self, node: &TaskNode) {
            self.post.push(node.position());
        }
    }

    #[test]
    fn skip_marks_visited_without_descending() {
        let g = diamond();
        let mut v = SkipAll {
            visited: Vec::new(),
            post: Vec::new(),
        };
        assert_eq!(g.start_visit(&mut v), VisitResult::Continue);
        assert_eq!(v.visited, vec![0, 1, 2, 3]);
        assert!(v.post.is_empty());
    }
}
