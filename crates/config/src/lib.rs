//! Configuration loading, env substitution, env overrides, and validation.
//!
//! Config files: `palaver.toml`, `palaver.yaml`, `palaver.yml` or
//! `palaver.json`, searched in `./` then `~/.config/palaver/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file text before parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config, parse_config},
    schema::{ConversationConfig, EventsConfig, PalaverConfig, SchedulerConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
