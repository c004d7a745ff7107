// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::time::Duration;

use thiserror::Error;

use crate::types::Position;

/// A dependency cycle between logical job ids.
///
/// `path` starts and ends with the id whose insertion closed the cycle, e.g.
/// `["A", "B", "A"]`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dependency cycle detected: {}", .path.join(" ==> "))]
pub struct CycleError {
    pub path: Vec<String>,
}

impl CycleError {
    /// Distinct ids on the cycle, in path order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        let len = self.path.len().saturating_sub(1).max(1);
        self.path.iter().take(len).map(|s| s.as_str())
    }
}

#[derive(Error, Debug)]
pub enum JobGridError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    DependencyCycle(#[from] CycleError),

    #[error("Cycle detected in task graph at position {0}")]
    TaskCycle(Position),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Malformed task graph bytes: {0}")]
    Decode(String),

    #[error("Timed out after {waited:?} waiting for removal of job {uuid}")]
    RemovalTimeout { uuid: String, waited: Duration },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobGridError>;
