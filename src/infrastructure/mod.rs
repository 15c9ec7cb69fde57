//! Infrastructure layer: ambient concerns that sit outside the domain/ports
//! split: configuration loading and structured logging.

pub mod config;
pub mod logging;

pub use config::{ConfigError, ConfigLoader};
pub use logging::{LogConfig, LoggerImpl};
