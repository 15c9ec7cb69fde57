//! Adapters: concrete implementations of the domain ports.

pub mod runtime;
pub mod sqlite;
