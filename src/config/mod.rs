// src/config/mod.rs

//! Grid plan loading and validation.
//!
//! - [`model`] is the TOML-backed data model.
//! - [`loader`] reads a plan from disk.
//! - [`validate`] turns a `RawConfigFile` into a checked `ConfigFile`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, DispatchSection, JobConfig, QueueSection, RawConfigFile, TaskSpec};
pub use validate::validate_config;
