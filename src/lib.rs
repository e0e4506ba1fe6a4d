//! Code execution service
//!
//! A bounded-concurrency queue in front of a runner that executes untrusted
//! source code either locally (child processes) or on a remote judge, and
//! reports every outcome in one uniform result shape.

pub mod config;
pub mod error;
pub mod executor;
pub mod languages;
pub mod queue;
pub mod result;
pub mod runner;
pub mod server;

pub use config::ServiceConfig;
pub use error::{ExecError, QueueError};
pub use queue::{ExecutionQueue, QueueStats, QueueStatus, TaskMetadata};
pub use result::{ExecutionMode, ExecutionOptions, ExecutionResult, ExecutionStatus};
pub use runner::Runner;
