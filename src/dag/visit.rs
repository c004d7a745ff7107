// src/dag/visit.rs

//! Depth-first visitor protocol for [`TaskGraph`](super::TaskGraph).

use super::task_graph::TaskNode;

/// What the traversal should do after a node has been visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    /// Descend into the node's dependencies.
    Continue,
    /// Mark the node visited without descending (no post-visit).
    Skip,
    /// Abort the whole traversal immediately.
    Stop,
}

/// Callbacks invoked by [`TaskGraph::start_visit`](super::TaskGraph::start_visit)
/// and [`TaskGraph::start_visit_not_done`](super::TaskGraph::start_visit_not_done).
///
/// For each node the order is `pre_visit`, `visit`, then (only on
/// [`VisitResult::Continue`]) the dependencies, then `post_visit`.
pub trait TaskNodeVisitor {
    fn pre_visit(&mut self, _node: &TaskNode) {}

    fn visit(&mut self, node: &TaskNode) -> VisitResult;

    fn post_visit(&mut self, _node: &TaskNode) {}
}
