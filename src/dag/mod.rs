// src/dag/mod.rs

//! Dependency graphs.
//!
//! - [`task_graph`] is the DAG over the task positions of a single job.
//! - [`visit`] is the depth-first visitor protocol over a task graph.
//! - [`codec`] is the binary wire form of a task graph.
//! - [`job_graph`] is the DAG over logical job ids, shared by all jobs of a
//!   queue.

pub mod codec;
pub mod job_graph;
pub mod task_graph;
pub mod visit;

pub use job_graph::{GraphState, JobDependencyGraph, JobDependencyNode};
pub use task_graph::{DependentTask, TaskGraph, TaskNode};
pub use visit::{TaskNodeVisitor, VisitResult};
