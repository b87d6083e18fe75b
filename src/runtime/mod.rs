//! # Runtime
//!
//! - `error_policy`: outcome classification and config error escalation
//! - `initialization`: operator startup
//! - `queue`: per-identity single-flight work queue
//! - `scheduler`: bounded dispatch of queued identities
//! - `watch_loop`: Kubernetes watch feeding the queue

pub mod error_policy;
pub mod initialization;
pub mod queue;
pub mod scheduler;
pub mod watch_loop;
