//! Domain models: pure entities and value types, framework-agnostic.

pub mod agent;
pub mod config;
pub mod coordination;
pub mod dag;
pub mod event;
pub mod guardian;
pub mod heartbeat;
pub mod task;
pub mod ticket;

pub use agent::{Agent, AgentKind, AgentStatus, AgentStatusTransition, AuthorityLevel, HealthLabel};
pub use config::Config;
pub use coordination::{CoordinationKind, CoordinationPoint, MergeStrategy};
pub use dag::{would_create_cycle, DagError, DagNode, TaskDag};
pub use event::{EntityType, EventId, EventPayload, SequenceNumber, SystemEvent};
pub use guardian::{GuardianAction, InterventionRecord, RestartAttempt};
pub use heartbeat::{EscalationLevel, HeartbeatAck, HeartbeatMessage};
pub use task::{Task, TaskPriority, TaskStatus};
pub use ticket::{Ticket, TicketStatus};
