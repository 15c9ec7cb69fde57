//! `AgentRuntime` implementations.

pub mod mock;
pub mod process;

pub use mock::MockRuntime;
pub use process::{ProcessRuntime, ProcessRuntimeConfig};
