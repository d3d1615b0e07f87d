//! sessionmon-core — types and configuration for the HAProxy session monitor.
//!
//! # Architecture
//!
//! ```text
//! config.toml ─► RawConfig (serde) ─► validate() ─► Config
//!                                                    ├── LoggingConfig
//!                                                    ├── sinks:   id → SinkConfig
//!                                                    └── servers: id → ServerConfig
//! ```

pub mod config;
pub mod types;

pub use config::{Config, ConfigError, LogLevel, LoggingConfig, ServerConfig, SinkConfig, SinkKind};
pub use types::{Credentials, Metric};
