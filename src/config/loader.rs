// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a plan without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Read, deserialize and validate a plan.
///
/// Checks that every job has tasks, that task `after` references are in
/// range, that each job's task DAG is acyclic and that the numeric
/// queue/dispatch settings make sense.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    debug!(path = %path.as_ref().display(), jobs = config.job.len(), "plan loaded");
    Ok(config)
}

/// `grid.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("grid.toml")
}
