// src/dag/job_graph.rs

//! Cross-job dependency graph keyed by logical (user-chosen) job ids.
//!
//! Nodes are created lazily: the first time an id is referenced, either as
//! the subject of [`GraphState::add_node`] or as somebody's dependency. A
//! node referenced only as a dependency is a *placeholder* until a job with
//! that id is queued and binds its uuid to it.
//!
//! Edges are stored as ids resolved through the graph's own index; the
//! `depended_on` back-references are plain id sets, never owning.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::errors::CycleError;
use crate::types::JobUuid;

/// A logical job id in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDependencyNode {
    id: String,
    job_uuid: Option<JobUuid>,
    /// Ids of the jobs this one waits on.
    dependencies: BTreeSet<String>,
    /// Ids of the jobs waiting on this one.
    depended_on: BTreeSet<String>,
    completed: bool,
    cancelled: bool,
    remove_upon_completion: bool,
}

impl JobDependencyNode {
    fn new(id: &str, job_uuid: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            job_uuid: job_uuid.map(str::to_string),
            dependencies: BTreeSet::new(),
            depended_on: BTreeSet::new(),
            completed: false,
            cancelled: false,
            remove_upon_completion: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Uuid of the queued job bound to this id, `None` for a placeholder.
    pub fn job_uuid(&self) -> Option<&str> {
        self.job_uuid.as_deref()
    }

    pub fn is_placeholder(&self) -> bool {
        self.job_uuid.is_none()
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn depended_on(&self) -> &BTreeSet<String> {
        &self.depended_on
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    pub fn remove_upon_completion(&self) -> bool {
        self.remove_upon_completion
    }

    pub fn set_remove_upon_completion(&mut self, remove: bool) {
        self.remove_upon_completion = remove;
    }
}

impl fmt::Display for JobDependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JobDependencyNode[id={}, job_uuid={:?}, completed={}, cancelled={}, remove_upon_completion={}, dependencies={:?}, depended_on={:?}]",
            self.id,
            self.job_uuid,
            self.completed,
            self.cancelled,
            self.remove_upon_completion,
            self.dependencies,
            self.depended_on
        )
    }
}

/// The unsynchronized node store. Reached through
/// [`JobDependencyGraph::execute_synchronized`] or the graph's own methods.
#[derive(Debug, Default)]
pub struct GraphState {
    nodes: HashMap<String, JobDependencyNode>,
    /// job uuid -> id of the node it is bound to.
    nodes_by_uuid: HashMap<JobUuid, String>,
}

impl GraphState {
    pub fn node(&self, id: &str) -> Option<&JobDependencyNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut JobDependencyNode> {
        self.nodes.get_mut(id)
    }

    pub fn node_by_uuid(&self, job_uuid: &str) -> Option<&JobDependencyNode> {
        self.nodes_by_uuid
            .get(job_uuid)
            .and_then(|id| self.nodes.get(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &JobDependencyNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register `id`, optionally bound to `job_uuid`, as depending on
    /// `dependency_ids`.
    ///
    /// On a cycle nothing is modified and the error carries the cycle path.
    /// If `id` is already bound to a different uuid, the old node is
    /// discarded and a fresh one takes its place; edges pointing at the old
    /// node from its dependents are not relinked to the new one.
    pub fn add_node(
        &mut self,
        id: &str,
        job_uuid: Option<&str>,
        dependency_ids: &[String],
    ) -> Result<(), CycleError> {
        for dep in dependency_ids {
            if let Some(path) = self.cycle_path(id, dep) {
                let err = CycleError { path };
                error!(id, dependency = %dep, cycle = %err, "cycle detected while adding job dependency");
                return Err(err);
            }
        }

        let stale = match (self.nodes.get(id), job_uuid) {
            (Some(existing), Some(new_uuid)) => existing
                .job_uuid()
                .is_some_and(|bound| bound != new_uuid),
            _ => false,
        };
        if stale {
            self.discard(id);
        }

        let node = self
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| JobDependencyNode::new(id, None));
        if let Some(uuid) = job_uuid {
            if node.job_uuid.is_none() {
                node.job_uuid = Some(uuid.to_string());
            }
            self.nodes_by_uuid.insert(uuid.to_string(), id.to_string());
        }

        for dep in dependency_ids {
            let dep_node = self
                .nodes
                .entry(dep.clone())
                .or_insert_with(|| JobDependencyNode::new(dep, None));
            dep_node.depended_on.insert(id.to_string());
            if let Some(node) = self.nodes.get_mut(id) {
                node.dependencies.insert(dep.clone());
            }
        }

        debug!(id, ?job_uuid, dependencies = ?dependency_ids, "job dependency node added");
        Ok(())
    }

    /// Drop a node whose id is being reused by a different job.
    fn discard(&mut self, id: &str) {
        let Some(old) = self.nodes.remove(id) else {
            return;
        };
        warn!(
            id,
            old_uuid = ?old.job_uuid,
            "dependency id rebound to a new job; discarding the previous node"
        );
        if let Some(uuid) = &old.job_uuid {
            self.nodes_by_uuid.remove(uuid);
        }
        for dep in &old.dependencies {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.depended_on.remove(id);
            }
        }
    }

    /// If making `id` depend on `dependency` would close a cycle, the ids on
    /// that cycle: `[id, dependency, ..., id]`.
    fn cycle_path(&self, id: &str, dependency: &str) -> Option<Vec<String>> {
        if id == dependency {
            return Some(vec![id.to_string(), id.to_string()]);
        }

        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if self.reaches(id, dependency, &mut visited, &mut path) {
            let mut full = Vec::with_capacity(path.len() + 2);
            full.push(id.to_string());
            full.extend(path);
            full.push(id.to_string());
            Some(full)
        } else {
            None
        }
    }

    /// Whether `target` is reachable from `current` through dependency
    /// edges. On success `path` holds the ids walked from `current`.
    fn reaches(
        &self,
        target: &str,
        current: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        path.push(current.to_string());
        if visited.insert(current.to_string()) {
            if let Some(node) = self.nodes.get(current) {
                if node.dependencies.contains(target) {
                    return true;
                }
                for dep in &node.dependencies {
                    if self.reaches(target, dep, visited, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }

    /// Mark the node bound to `job_uuid` completed and return the dependents
    /// for which it was the last pending dependency.
    pub fn job_ended(&mut self, job_uuid: &str) -> Vec<JobDependencyNode> {
        let Some(id) = self.nodes_by_uuid.get(job_uuid).cloned() else {
            return Vec::new();
        };
        let Some(node) = self.nodes.get_mut(&id) else {
            return Vec::new();
        };
        node.completed = true;
        let dependents = node.depended_on.clone();

        let released: Vec<JobDependencyNode> = dependents
            .iter()
            .filter_map(|dep_id| self.nodes.get(dep_id))
            .filter(|dependent| !self.has_pending_dependency_of(dependent))
            .cloned()
            .collect();

        debug!(
            id = %id,
            job = %job_uuid,
            released = ?released.iter().map(|n| n.id()).collect::<Vec<_>>(),
            "job dependency completed"
        );
        released
    }

    /// Whether the node for `id` waits on at least one job that has not
    /// completed. Unknown ids have nothing pending.
    pub fn has_pending_dependency(&self, id: &str) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|node| self.has_pending_dependency_of(node))
    }

    fn has_pending_dependency_of(&self, node: &JobDependencyNode) -> bool {
        node.dependencies
            .iter()
            .any(|dep| self.nodes.get(dep).is_some_and(|d| !d.completed))
    }

    /// Remove `id` together with, recursively, everything it depends on.
    ///
    /// Dependencies are removed even if other nodes still depend on them.
    /// Returns the ids removed, dependencies first.
    pub fn remove_node(&mut self, id: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.remove_recursive(id, &mut removed);
        if !removed.is_empty() {
            debug!(id, ?removed, "removed job dependency nodes");
        }
        removed
    }

    fn remove_recursive(&mut self, id: &str, removed: &mut Vec<String>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };

        let dependencies: Vec<String> = node.dependencies.iter().cloned().collect();
        for dep in dependencies {
            self.remove_recursive(&dep, removed);
        }

        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        for dependent in &node.depended_on {
            if let Some(n) = self.nodes.get_mut(dependent) {
                n.dependencies.remove(id);
            }
        }
        for dep in &node.dependencies {
            if let Some(n) = self.nodes.get_mut(dep) {
                n.depended_on.remove(id);
            }
        }
        if let Some(uuid) = &node.job_uuid {
            self.nodes_by_uuid.remove(uuid);
        }
        removed.push(node.id);
    }
}

/// Process-wide graph of logical job dependencies.
///
/// Every operation runs under one per-instance lock; composite
/// check-then-act sequences go through [`execute_synchronized`](Self::execute_synchronized).
#[derive(Debug, Default)]
pub struct JobDependencyGraph {
    state: Mutex<GraphState>,
}

impl JobDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the node store.
    pub fn execute_synchronized<R>(&self, f: impl FnOnce(&mut GraphState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }

    pub fn add_node(
        &self,
        id: &str,
        job_uuid: Option<&str>,
        dependency_ids: &[String],
    ) -> Result<(), CycleError> {
        self.execute_synchronized(|g| g.add_node(id, job_uuid, dependency_ids))
    }

    pub fn job_ended(&self, job_uuid: &str) -> Vec<JobDependencyNode> {
        self.execute_synchronized(|g| g.job_ended(job_uuid))
    }

    pub fn remove_node(&self, id: &str) -> Vec<String> {
        self.execute_synchronized(|g| g.remove_node(id))
    }

    /// Snapshot of the node for `id`.
    pub fn node(&self, id: &str) -> Option<JobDependencyNode> {
        self.execute_synchronized(|g| g.node(id).cloned())
    }

    pub fn node_by_uuid(&self, job_uuid: &str) -> Option<JobDependencyNode> {
        self.execute_synchronized(|g| g.node_by_uuid(job_uuid).cloned())
    }

    pub fn has_pending_dependency(&self, id: &str) -> bool {
        self.execute_synchronized(|g| g.has_pending_dependency(id))
    }

    pub fn len(&self) -> usize {
        self.execute_synchronized(|g| g.len())
    }

    pub fn is_empty(&self) -> bool {
        self.execute_synchronized(|g| g.is_empty())
    }

    /// Snapshot of every node, sorted by id.
    pub fn all_nodes(&self) -> Vec<JobDependencyNode> {
        let mut nodes: Vec<JobDependencyNode> =
            self.execute_synchronized(|g| g.nodes().cloned().collect());
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}
