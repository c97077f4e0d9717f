//! Configuration for Stockyard deployments.
//!
//! [`StockyardConfig`] wraps the engine tuning from `stockyard-core` with the
//! device link and logging settings a binary needs. Loading follows a fixed
//! precedence; see [`StockyardConfig::load_from_env`].

pub mod error;
pub mod loader;
pub mod models;

pub use error::ConfigLoadError;
pub use loader::ConfigSource;
pub use models::{DeviceConfig, LoggingConfig, StockyardConfig, TransportKind};
