//! Local executor implementation
//!
//! Compiles and runs a submission directly as a child process. Each run gets
//! a private scratch directory under the configured root, which is removed on
//! every exit path. There is no sandbox beyond the OS process boundary, a
//! wall-clock timeout and capped output buffers.

use async_trait::async_trait;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CommandSpec, ExecutionBackend, ExecutionJob};
use crate::config::LocalConfig;
use crate::error::{ExecError, ExecResult};
use crate::languages::Language;
use crate::result::{
    ExecutionMode, ExecutionResult, ExecutionStatus, STATUS_ACCEPTED, STATUS_FAILED,
};

/// Output cap per stream (stdout and stderr separately)
pub const OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;
/// Default bound for the compile step
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(30);
/// Name of the stdin file written next to the source
const STDIN_FILE: &str = "input.txt";
/// How long to wait for pipe readers once the child is gone
const READER_GRACE: Duration = Duration::from_secs(1);

/// Outcome category of a local run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    Accepted,
    CompilationError,
    TimeLimitExceeded,
    RuntimeError,
}

impl std::fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LocalStatus::Accepted => "Accepted",
            LocalStatus::CompilationError => "Compilation Error",
            LocalStatus::TimeLimitExceeded => "Time Limit Exceeded",
            LocalStatus::RuntimeError => "Runtime Error",
        };
        write!(f, "{}", s)
    }
}

/// Result of compiling and running one submission locally
#[derive(Debug)]
pub struct LocalOutcome {
    pub status: LocalStatus,
    pub stdout: String,
    pub stderr: String,
    pub compile_output: String,
    /// Wall time of the run step in milliseconds (0 if it never ran)
    pub time_ms: u64,
    /// Exit code of the last process (None if killed by a signal or never run)
    pub exit_code: Option<i32>,
}

/// Raw output of one child process
#[derive(Debug)]
struct ProcessOutput {
    status: Option<ExitStatus>,
    timed_out: bool,
    stdout: String,
    stderr: String,
    elapsed: Duration,
}

impl ProcessOutput {
    fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }

    fn signal(&self) -> Option<i32> {
        self.status.and_then(|s| s.signal())
    }
}

/// Executor that runs submissions directly on the host
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    temp_root: PathBuf,
    compile_timeout: Duration,
    /// Replaces every language's own run timeout when set
    run_timeout_override: Option<Duration>,
    output_limit: usize,
}

impl LocalExecutor {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            run_timeout_override: None,
            output_limit: OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn from_config(config: &LocalConfig) -> Self {
        let mut executor = Self::new(&config.temp_root)
            .with_compile_timeout(Duration::from_millis(config.compile_timeout_ms));
        if let Some(ms) = config.run_timeout_ms {
            executor = executor.with_run_timeout(Duration::from_millis(ms));
        }
        executor
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_override = Some(timeout);
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    fn run_timeout(&self, language: Language) -> Duration {
        self.run_timeout_override
            .unwrap_or(language.descriptor().timeout)
    }

    /// Compile (if needed) and run `source_code`, feeding it `stdin`
    pub async fn execute(
        &self,
        language: Language,
        source_code: &str,
        stdin: &str,
    ) -> ExecResult<LocalOutcome> {
        self.in_scratch_dir(|work_dir| async move {
            self.execute_in(&work_dir, language, source_code, stdin)
                .await
        })
        .await
    }

    /// Run `f` inside a fresh scratch directory and remove it afterwards.
    ///
    /// Removal happens whether `f` succeeds or fails; if the future is dropped
    /// or panics, `TempDir`'s destructor removes the directory instead.
    async fn in_scratch_dir<F, Fut, T>(&self, f: F) -> ExecResult<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: std::future::Future<Output = ExecResult<T>>,
    {
        fs::create_dir_all(&self.temp_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("exec-")
            .tempdir_in(&self.temp_root)?;
        let path = scratch.path().to_path_buf();
        debug!("Created working directory {}", path.display());

        let result = f(path.clone()).await;

        // `scratch` stays alive until here so a panic in `f` still cleans up
        if let Err(e) = fs::remove_dir_all(&path).await {
            warn!("Failed to remove working directory {}: {}", path.display(), e);
        }
        drop(scratch);
        result
    }

    async fn execute_in(
        &self,
        work_dir: &Path,
        language: Language,
        source_code: &str,
        stdin: &str,
    ) -> ExecResult<LocalOutcome> {
        let source_path = work_dir.join(language.source_file_name(source_code));
        fs::write(&source_path, source_code).await?;

        let stdin_path = if stdin.is_empty() {
            None
        } else {
            let path = work_dir.join(STDIN_FILE);
            fs::write(&path, stdin).await?;
            Some(path)
        };

        if let Some(compile_cmd) = language.compile_command(source_code) {
            let spec = CommandSpec::from_vec(&compile_cmd, work_dir);
            let compiled = self.run_process(&spec, self.compile_timeout).await?;

            if !compiled.success() {
                let mut compile_output = format!("{}{}", compiled.stdout, compiled.stderr);
                if compiled.timed_out {
                    compile_output.push_str(&format!(
                        "\nCompilation timed out after {}ms",
                        self.compile_timeout.as_millis()
                    ));
                }
                info!("Compilation failed for {}", language);
                return Ok(LocalOutcome {
                    status: LocalStatus::CompilationError,
                    stdout: String::new(),
                    stderr: String::new(),
                    compile_output,
                    time_ms: 0,
                    exit_code: compiled.status.and_then(|s| s.code()),
                });
            }
        }

        let spec = CommandSpec::from_vec(&language.run_command(source_code), work_dir)
            .with_stdin_file(stdin_path);
        let ran = self.run_process(&spec, self.run_timeout(language)).await?;

        let mut stderr = ran.stderr.clone();
        let status = if ran.timed_out {
            LocalStatus::TimeLimitExceeded
        } else if let Some(sig) = ran.signal() {
            let name = signal_name(sig);
            if name == "SIGXCPU" {
                LocalStatus::TimeLimitExceeded
            } else {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("Killed by signal {}", name));
                LocalStatus::RuntimeError
            }
        } else if ran.success() {
            LocalStatus::Accepted
        } else {
            LocalStatus::RuntimeError
        };

        Ok(LocalOutcome {
            status,
            stdout: ran.stdout,
            stderr,
            compile_output: String::new(),
            time_ms: ran.elapsed.as_millis() as u64,
            exit_code: ran.status.and_then(|s| s.code()),
        })
    }

    /// Spawn one child process and wait for it with a timeout
    async fn run_process(&self, spec: &CommandSpec, limit: Duration) -> ExecResult<ProcessOutput> {
        if spec.program.is_empty() {
            return Err(ExecError::Spawn {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        }

        debug!(
            "Running {:?} {:?} in {} (timeout {}ms)",
            spec.program,
            spec.args,
            spec.work_dir.display(),
            limit.as_millis()
        );

        let stdin = match &spec.stdin_file {
            Some(path) => Stdio::from(fs::File::open(path).await?.into_std().await),
            None => Stdio::null(),
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.work_dir)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout_reader = tokio::spawn(read_capped(child.stdout.take(), self.output_limit));
        let stderr_reader = tokio::spawn(read_capped(child.stderr.take(), self.output_limit));

        let (status, timed_out) = match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                debug!("{} exceeded {}ms, killing", spec.program, limit.as_millis());
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill {}: {}", spec.program, e);
                }
                (child.wait().await.ok(), true)
            }
        };
        let elapsed = started.elapsed();

        let stdout = collect_reader(stdout_reader, "stdout").await?;
        let stderr = collect_reader(stderr_reader, "stderr").await?;

        if stdout.overflowed {
            return Err(ExecError::OutputLimitExceeded {
                stream: "stdout",
                limit: self.output_limit,
            });
        }
        if stderr.overflowed {
            return Err(ExecError::OutputLimitExceeded {
                stream: "stderr",
                limit: self.output_limit,
            });
        }

        Ok(ProcessOutput {
            status,
            timed_out,
            stdout: String::from_utf8_lossy(&stdout.bytes).to_string(),
            stderr: String::from_utf8_lossy(&stderr.bytes).to_string(),
            elapsed,
        })
    }
}

#[async_trait]
impl ExecutionBackend for LocalExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    async fn run(&self, job: &ExecutionJob) -> ExecResult<ExecutionResult> {
        let started = Instant::now();
        let outcome = self
            .execute(job.language, &job.source_code, &job.stdin)
            .await?;
        let execution_time = started.elapsed().as_millis() as u64;

        let status_id = if outcome.status == LocalStatus::Accepted {
            STATUS_ACCEPTED
        } else {
            STATUS_FAILED
        };

        Ok(ExecutionResult {
            success: true,
            status: ExecutionStatus::new(status_id, outcome.status.to_string()),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            compile_output: outcome.compile_output,
            time: Some(outcome.time_ms as f64 / 1000.0),
            memory: None,
            execution_time,
            language: job.language_name.clone(),
            language_id: Some(job.language.id()),
            token: None,
            mode: ExecutionMode::Local,
        })
    }
}

#[derive(Debug, Default)]
struct CappedOutput {
    bytes: Vec<u8>,
    overflowed: bool,
}

/// Drain a pipe, keeping at most `limit` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<CappedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut output = CappedOutput::default();
    let Some(mut reader) = reader else {
        return Ok(output);
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(output.bytes.len());
        if n > room {
            output.overflowed = true;
        }
        output.bytes.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok(output)
}

async fn collect_reader(
    handle: tokio::task::JoinHandle<std::io::Result<CappedOutput>>,
    stream: &'static str,
) -> ExecResult<CappedOutput> {
    let abort = handle.abort_handle();
    match tokio::time::timeout(READER_GRACE, handle).await {
        Ok(Ok(output)) => Ok(output?),
        Ok(Err(join_err)) => Err(ExecError::Io(std::io::Error::other(join_err.to_string()))),
        Err(_) => {
            // A grandchild still holds the pipe open
            abort.abort();
            warn!("{} reader did not finish after process exit", stream);
            Err(ExecError::OutputDetached { stream })
        }
    }
}

fn signal_name(sig: i32) -> String {
    nix::sys::signal::Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {}", sig))
}
