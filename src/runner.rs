//! Runner - validation and backend dispatch
//!
//! `Runner::run` is the single normalization boundary of the subsystem: it
//! resolves the language, enforces payload ceilings, hands the job to the
//! configured backend and turns any failure into an `ExecutionResult`.
//! It never returns an error.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::{ExecError, ExecResult};
use crate::executor::{ExecutionBackend, ExecutionJob, LocalExecutor, RemoteJudgeClient};
use crate::languages::resolve_language;
use crate::result::{
    ExecutionMode, ExecutionOptions, ExecutionResult, MAX_SOURCE_CHARS, MAX_STDIN_CHARS,
};

pub const UNSUPPORTED_LANGUAGE: &str = "Unsupported Language";
pub const PAYLOAD_TOO_LARGE: &str = "Payload Too Large";
pub const EXECUTION_ERROR: &str = "Execution Error";

/// Liveness report for the configured backend
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub mode: ExecutionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dispatches validated jobs to the local or remote backend
#[derive(Clone)]
pub struct Runner {
    backend: Arc<dyn ExecutionBackend>,
    /// Kept separately for `/about` probes
    remote: Option<Arc<RemoteJudgeClient>>,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn local(executor: LocalExecutor) -> Self {
        Self::with_backend(Arc::new(executor))
    }

    pub fn remote(client: RemoteJudgeClient) -> Self {
        let client = Arc::new(client);
        Self {
            backend: client.clone(),
            remote: Some(client),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_backend(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            remote: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        Ok(match config.mode {
            ExecutionMode::Local => Self::local(LocalExecutor::from_config(&config.local)),
            ExecutionMode::Remote => Self::remote(RemoteJudgeClient::new(&config.remote)?),
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.backend.mode()
    }

    /// Stop every remote poll that is still waiting on the judge
    pub fn cancel_pending(&self) {
        self.shutdown.cancel();
    }

    /// Execute `source_code` in `language`. Never fails; errors become results.
    pub async fn run(
        &self,
        language: &str,
        source_code: &str,
        stdin: &str,
        options: ExecutionOptions,
    ) -> ExecutionResult {
        let mode = self.mode();

        let Some(lang) = resolve_language(language) else {
            let err = ExecError::UnsupportedLanguage(language.trim().to_string());
            warn!("Rejected request: {}", err);
            return ExecutionResult::failure(
                UNSUPPORTED_LANGUAGE,
                err.to_string(),
                language,
                None,
                mode,
            );
        };

        if let Err(err) = check_payload(source_code, stdin) {
            warn!("Rejected {} request: {}", lang, err);
            return ExecutionResult::failure(
                PAYLOAD_TOO_LARGE,
                err.to_string(),
                language,
                Some(lang.id()),
                mode,
            );
        }

        let job = ExecutionJob {
            language_name: language.to_string(),
            language: lang,
            source_code: source_code.to_string(),
            stdin: stdin.to_string(),
            options,
            cancel: self.shutdown.child_token(),
        };

        let started = Instant::now();
        match self.backend.run(&job).await {
            Ok(result) => {
                info!(
                    "Executed {} in {} mode: {} ({}ms)",
                    lang, mode, result.status.description, result.execution_time
                );
                result
            }
            Err(err) => {
                error!("Execution failed for {} in {} mode: {}", lang, mode, err);
                let mut result = ExecutionResult::failure(
                    EXECUTION_ERROR,
                    err.to_string(),
                    language,
                    Some(lang.id()),
                    mode,
                );
                result.execution_time = started.elapsed().as_millis() as u64;
                result
            }
        }
    }

    /// Best-effort probe of the backend; never fails
    pub async fn check_health(&self) -> HealthReport {
        let Some(remote) = &self.remote else {
            return HealthReport {
                healthy: true,
                mode: self.mode(),
                info: None,
                error: None,
            };
        };

        match remote.about().await {
            Ok(info) => HealthReport {
                healthy: true,
                mode: ExecutionMode::Remote,
                info: Some(info),
                error: None,
            },
            Err(e) => {
                warn!("Remote judge health check failed: {}", e);
                HealthReport {
                    healthy: false,
                    mode: ExecutionMode::Remote,
                    info: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Remote judge `/about` payload, if reachable
    pub async fn service_info(&self) -> Option<serde_json::Value> {
        self.check_health().await.info
    }
}

/// Enforce the source and stdin length ceilings (in characters)
pub fn check_payload(source_code: &str, stdin: &str) -> ExecResult<()> {
    let source_len = source_code.chars().count();
    if source_len > MAX_SOURCE_CHARS {
        return Err(ExecError::PayloadTooLarge {
            field: "source_code",
            limit: MAX_SOURCE_CHARS,
            actual: source_len,
        });
    }
    let stdin_len = stdin.chars().count();
    if stdin_len > MAX_STDIN_CHARS {
        return Err(ExecError::PayloadTooLarge {
            field: "stdin",
            limit: MAX_STDIN_CHARS,
            actual: stdin_len,
        });
    }
    Ok(())
}
