//! # Configuration
//!
//! Process-wide operator settings, loaded once at startup and immutable afterwards.

mod operator;

pub use operator::{ConfigError, OperatorConfig, SharedOperatorConfig};
