//! Domain ports (interfaces) for the control plane.

pub mod agent_repository;
pub mod clock;
pub mod guardian_repository;
pub mod runtime;
pub mod task_repository;
pub mod ticket_repository;

pub use agent_repository::{AgentMatch, AgentRepository};
pub use clock::{Clock, FixedClock, SystemClock};
pub use guardian_repository::{CooldownState, GuardianRepository};
pub use runtime::{AgentRuntime, ExecutionMode, MessageType, RuntimeMessage, SpawnRequest};
pub use task_repository::{TaskFilter, TaskRepository};
pub use ticket_repository::TicketRepository;
