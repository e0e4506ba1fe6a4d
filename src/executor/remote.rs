//! Remote judge client
//!
//! Talks to a Judge0-compatible service: submit without waiting, then poll
//! the submission by token until the judge reports a terminal status.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ExecutionBackend, ExecutionJob};
use crate::config::RemoteConfig;
use crate::error::{ExecError, ExecResult};
use crate::result::{ExecutionMode, ExecutionResult, ExecutionStatus};

/// Judge status id: waiting in the judge's own queue
pub const STATUS_IN_QUEUE: i32 = 1;
/// Judge status id: currently running
pub const STATUS_PROCESSING: i32 = 2;

const API_KEY_HEADER: &str = "X-RapidAPI-Key";

/// Body of `POST /submissions`
#[derive(Debug, Serialize)]
struct SubmissionRequest<'a> {
    language_id: u32,
    source_code: &'a str,
    stdin: &'a str,
    cpu_time_limit: f64,
    memory_limit: u64,
}

#[derive(Debug, Deserialize)]
struct SubmissionToken {
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireStatus {
    pub id: i32,
    #[serde(default)]
    pub description: String,
}

/// Body of `GET /submissions/{token}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionResponse {
    pub status: Option<WireStatus>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub message: Option<String>,
    /// CPU seconds; the judge sends this as a decimal string
    #[serde(default, deserialize_with = "de_seconds")]
    pub time: Option<f64>,
    pub memory: Option<u64>,
}

impl SubmissionResponse {
    /// Status id, treating a missing status as still queued
    pub fn status_id(&self) -> i32 {
        self.status.as_ref().map(|s| s.id).unwrap_or(STATUS_IN_QUEUE)
    }

    pub fn is_terminal(&self) -> bool {
        self.status_id() > STATUS_PROCESSING
    }
}

fn de_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Seconds>::deserialize(deserializer)? {
        Some(Seconds::Number(n)) => Some(n),
        Some(Seconds::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Bounds for one polling loop
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Wall-clock cutoff, independent of the attempt count.
    /// `None` when the budget is too large to represent.
    pub deadline: Option<Instant>,
}

impl PollPolicy {
    /// Attempt budget plus a wall-clock deadline of `attempts × interval + slack`
    pub fn new(interval: Duration, max_attempts: u32, slack: Duration) -> Self {
        let deadline = interval
            .checked_mul(max_attempts)
            .and_then(|budget| budget.checked_add(slack))
            .and_then(|budget| Instant::now().checked_add(budget));
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            deadline,
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// HTTP client for a Judge0-compatible judging service
#[derive(Debug, Clone)]
pub struct RemoteJudgeClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl RemoteJudgeClient {
    pub fn new(config: &RemoteConfig) -> ExecResult<Self> {
        let request_timeout = Duration::from_millis(config.request_timeout_ms);

        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key).map_err(|e| {
                ExecError::UnexpectedResponse(format!("invalid API key header: {}", e))
            })?;
            headers.insert(API_KEY_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a job without waiting; returns the judge's token
    pub async fn submit(&self, job: &ExecutionJob) -> ExecResult<String> {
        let body = SubmissionRequest {
            language_id: job.language.id(),
            source_code: &job.source_code,
            stdin: &job.stdin,
            cpu_time_limit: job.options.time_limit_seconds,
            memory_limit: job.options.memory_limit_kb,
        };

        let response = self
            .http
            .post(format!("{}/submissions", self.base_url))
            .query(&[("base64_encoded", "false"), ("wait", "false")])
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let SubmissionToken { token } = response.json().await?;
        if token.is_empty() {
            return Err(ExecError::UnexpectedResponse(
                "submission returned an empty token".into(),
            ));
        }
        Ok(token)
    }

    /// Fetch the current state of a submission once
    pub async fn fetch(&self, token: &str) -> ExecResult<SubmissionResponse> {
        let response = self
            .http
            .get(format!("{}/submissions/{}", self.base_url, token))
            .query(&[("base64_encoded", "false")])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Poll `token` until the judge reports a terminal status.
    ///
    /// Transport failures consume an attempt and are retried. The loop ends
    /// with `PollTimeout` once the attempt budget or the deadline runs out.
    pub async fn poll(
        &self,
        token: &str,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> ExecResult<SubmissionResponse> {
        let mut attempts = 0;

        while attempts < policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            if policy.expired() {
                warn!("Polling deadline passed for token {}", token);
                break;
            }
            attempts += 1;

            match self.fetch(token).await {
                Ok(response) if response.is_terminal() => {
                    debug!(
                        "Token {} terminal after {} attempts (status {})",
                        token,
                        attempts,
                        response.status_id()
                    );
                    return Ok(response);
                }
                Ok(response) => {
                    debug!(
                        "Token {} still pending (status {}), attempt {}/{}",
                        token,
                        response.status_id(),
                        attempts,
                        policy.max_attempts
                    );
                }
                Err(ExecError::Transport(e)) => {
                    warn!(
                        "Poll attempt {}/{} for token {} failed: {}",
                        attempts, policy.max_attempts, token, e
                    );
                }
                Err(e) => return Err(e),
            }

            if attempts < policy.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExecError::Cancelled),
                    _ = tokio::time::sleep(policy.interval) => {}
                }
            }
        }

        Err(ExecError::PollTimeout {
            token: token.to_string(),
            attempts,
        })
    }

    /// `GET /about` - liveness and version information
    pub async fn about(&self) -> ExecResult<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/about", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ExecutionBackend for RemoteJudgeClient {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Remote
    }

    async fn run(&self, job: &ExecutionJob) -> ExecResult<ExecutionResult> {
        let started = Instant::now();

        let token = self.submit(job).await?;
        info!("Submitted {} job to remote judge, token={}", job.language, token);

        let policy = PollPolicy::new(
            Duration::from_millis(job.options.poll_interval_ms),
            job.options.max_poll_attempts,
            self.request_timeout,
        );
        let response = self.poll(&token, &policy, &job.cancel).await?;

        let status = response.status.clone().unwrap_or(WireStatus {
            id: response.status_id(),
            description: String::new(),
        });
        let stderr = match (response.stderr, response.message) {
            (Some(stderr), _) if !stderr.is_empty() => stderr,
            (_, Some(message)) => message,
            (stderr, None) => stderr.unwrap_or_default(),
        };

        Ok(ExecutionResult {
            success: true,
            status: ExecutionStatus::new(status.id, status.description),
            stdout: response.stdout.unwrap_or_default(),
            stderr,
            compile_output: response.compile_output.unwrap_or_default(),
            time: response.time,
            memory: response.memory,
            execution_time: started.elapsed().as_millis() as u64,
            language: job.language_name.clone(),
            language_id: Some(job.language.id()),
            token: Some(token),
            mode: ExecutionMode::Remote,
        })
    }
}
