//! swarmctl - a control plane for coordinating a swarm of autonomous agents.
//!
//! Owns the task queue, agent registry, heartbeat protocol, coordination
//! engine, dispatcher loop, restart orchestrator and the five supervisor
//! loops that keep a long-running swarm healthy. Persistence is SQLite in
//! WAL mode; everything above the store is plain async Rust over trait
//! objects so the sandbox runtime and clock can be swapped for tests.

pub mod adapters;
pub mod context;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use context::CoreContext;
