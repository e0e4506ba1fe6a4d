//! Executor module - Backend abstraction layer
//!
//! This module provides a unified interface for executing a submission:
//! - `LocalExecutor`: runs the language toolchain as a child process
//! - `RemoteJudgeClient`: submits to an external judge and polls for the verdict
//!
//! Backends may fail with an `ExecError`; turning that into a result is the
//! runner's job, not theirs.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::error::ExecResult;
use crate::languages::Language;
use crate::result::{ExecutionMode, ExecutionOptions, ExecutionResult};

/// A validated request ready to hand to a backend
#[derive(Debug, Clone)]
pub struct ExecutionJob {
    /// Name as the caller spelled it, echoed back in the result
    pub language_name: String,
    pub language: Language,
    pub source_code: String,
    pub stdin: String,
    pub options: ExecutionOptions,
    /// Stops remote polling early; local runs ignore it
    pub cancel: CancellationToken,
}

/// Command specification for a child process
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Working directory
    pub work_dir: PathBuf,
    /// File redirected to the child's stdin
    pub stdin_file: Option<PathBuf>,
}

impl CommandSpec {
    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String], work_dir: impl AsRef<Path>) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self {
            program,
            args: iter.cloned().collect(),
            work_dir: work_dir.as_ref().to_path_buf(),
            stdin_file: None,
        }
    }

    pub fn with_stdin_file(mut self, path: Option<PathBuf>) -> Self {
        self.stdin_file = path;
        self
    }
}

/// Backend trait implemented by the local executor and the remote judge client
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Run one job to a terminal outcome
    async fn run(&self, job: &ExecutionJob) -> ExecResult<ExecutionResult>;
}

// Re-exports
pub use local::{LocalExecutor, LocalOutcome, LocalStatus};
pub use remote::RemoteJudgeClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_from_vec() {
        let cmd = vec!["java".to_string(), "-cp".to_string(), ".".to_string()];
        let spec = CommandSpec::from_vec(&cmd, "/tmp/work");
        assert_eq!(spec.program, "java");
        assert_eq!(spec.args, vec!["-cp", "."]);
        assert_eq!(spec.work_dir, PathBuf::from("/tmp/work"));
        assert!(spec.stdin_file.is_none());
    }

    #[test]
    fn test_command_spec_empty() {
        let spec = CommandSpec::from_vec(&[], ".");
        assert!(spec.program.is_empty());
        assert!(spec.args.is_empty());
    }
}
