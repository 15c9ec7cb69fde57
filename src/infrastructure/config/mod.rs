//! Configuration management infrastructure.
//!
//! Hierarchical configuration using figment: YAML file loading, environment
//! variable overrides, validation, and conversion into each service's own
//! `Duration`-typed config struct.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
