//! Structured logging: tracing subscriber setup with JSON/pretty output,
//! file rotation, and credential scrubbing for sandbox-originated text.

pub mod config;
pub mod logger;
pub mod secret_scrubbing;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
pub use secret_scrubbing::SecretScrubber;
