//! Request and result types shared by every backend
//!
//! `ExecutionResult` serializes to the exact shape the HTTP layer hands back
//! to clients, so field names here are part of the wire contract.

use serde::{Deserialize, Serialize};

/// Maximum accepted source code length in characters
pub const MAX_SOURCE_CHARS: usize = 50_000;
/// Maximum accepted stdin length in characters
pub const MAX_STDIN_CHARS: usize = 10_000;

/// Status id reported for a clean local run
pub const STATUS_ACCEPTED: i32 = 3;
/// Status id reported for every local or fail-fast failure
pub const STATUS_FAILED: i32 = -1;

/// Which backend produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Remote,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ExecutionMode::Local),
            "remote" | "judge0" => Ok(ExecutionMode::Remote),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

/// Per-request limits and polling knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// CPU time limit forwarded to the remote judge (seconds)
    pub time_limit_seconds: f64,
    /// Memory limit forwarded to the remote judge (KB)
    pub memory_limit_kb: u64,
    /// Poll attempt budget in remote mode
    pub max_poll_attempts: u32,
    /// Sleep between polls in remote mode (ms)
    pub poll_interval_ms: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            time_limit_seconds: 5.0,
            memory_limit_kb: 128_000,
            max_poll_attempts: 30,
            poll_interval_ms: 1000,
        }
    }
}

/// An execution request as received from the surrounding layer
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub stdin: String,
    #[serde(default)]
    pub options: ExecutionOptions,
}

/// Judge-style status pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub id: i32,
    pub description: String,
}

impl ExecutionStatus {
    pub fn new(id: i32, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }
}

/// Uniform result of one execution, whichever backend ran it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True when the pipeline terminated with a structured outcome,
    /// even if the submitted program itself failed
    pub success: bool,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub compile_output: String,
    /// CPU time in seconds
    pub time: Option<f64>,
    /// Memory in KB (never measured locally)
    pub memory: Option<u64>,
    /// Wall time spent in the backend, in milliseconds
    pub execution_time: u64,
    pub language: String,
    pub language_id: Option<u32>,
    pub token: Option<String>,
    pub mode: ExecutionMode,
}

impl ExecutionResult {
    /// A failed result carrying only a status and an error message
    pub fn failure(
        description: impl Into<String>,
        message: impl Into<String>,
        language: &str,
        language_id: Option<u32>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            success: false,
            status: ExecutionStatus::new(STATUS_FAILED, description),
            stdout: String::new(),
            stderr: message.into(),
            compile_output: String::new(),
            time: None,
            memory: None,
            execution_time: 0,
            language: language.to_string(),
            language_id,
            token: None,
            mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_wire_shape() {
        let result = ExecutionResult::failure(
            "Unsupported Language",
            "Unsupported language: cobol",
            "cobol",
            None,
            ExecutionMode::Local,
        );
        let json = serde_json::to_value(&result).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for key in [
            "success",
            "status",
            "stdout",
            "stderr",
            "compile_output",
            "time",
            "memory",
            "execution_time",
            "language",
            "language_id",
            "token",
            "mode",
        ] {
            assert!(keys.contains(&key), "missing key {}", key);
        }
        assert_eq!(json["status"]["id"], -1);
        assert_eq!(json["mode"], "local");
        assert!(json["time"].is_null());
    }

    #[test]
    fn test_options_defaults_fill_missing_fields() {
        let opts: ExecutionOptions = serde_json::from_str(r#"{"pollIntervalMs": 50}"#).unwrap();
        assert_eq!(opts.poll_interval_ms, 50);
        assert_eq!(opts.max_poll_attempts, 30);
        assert_eq!(opts.memory_limit_kb, 128_000);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("LOCAL".parse::<ExecutionMode>(), Ok(ExecutionMode::Local));
        assert_eq!("judge0".parse::<ExecutionMode>(), Ok(ExecutionMode::Remote));
        assert!("docker".parse::<ExecutionMode>().is_err());
    }
}
