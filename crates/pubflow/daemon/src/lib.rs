//! pubflow daemon library
//!
//! Wires configuration, storage, the reducer and the audit sink into a
//! running publishing pipeline:
//! - Layered configuration (defaults, file, environment)
//! - Storage backend selection
//! - Pipeline lifecycle and graceful shutdown

pub mod config;
pub mod error;
pub mod server;

pub use self::config::{AuditConfig, DaemonConfig, LoggingConfig, StorageConfig};
pub use self::error::{DaemonError, DaemonResult};
pub use self::server::Server;
