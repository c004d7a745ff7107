// src/exec/mod.rs

//! Execution layer.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `SimulatedExecutor` used by the simulator.
//! - [`executor_loop`] owns the per-worker loop that receives dispatches.
//! - [`task_runner`] runs the tasks of one dispatch and reports back.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{ExecutorBackend, SimulatedExecutor};
pub use executor_loop::spawn_worker;
