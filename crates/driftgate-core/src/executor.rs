//! Executor trait and process types.
//!
//! Executors run the commands of a step inside a job's checkout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::CommandLine;
use crate::{ResourceId, Result};

/// Specification for a process to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub id: ResourceId,
    pub command: CommandLine,
    /// Directory the process starts in.
    pub working_dir: PathBuf,
    /// Variables added on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Maximum execution time.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(command: CommandLine, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: ResourceId::new(),
            command,
            working_dir: working_dir.into(),
            env: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Handle to a running or completed process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub id: ResourceId,
    /// OS process id, if the executor has one.
    pub pid: Option<u32>,
    pub executor_name: String,
}

/// Final status of a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessStatus {
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Failed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        exit_code: Option<i32>,
        message: String,
    },
    Cancelled {
        started_at: DateTime<Utc>,
        cancelled_at: DateTime<Utc>,
    },
}

impl ProcessStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessStatus::Succeeded { .. })
    }
}

/// Result of a completed process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: LogStream::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Trait for process executors.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a process.
    async fn spawn(&self, spec: CommandSpec) -> Result<ProcessHandle>;

    /// Stream of output lines. Can be taken once per process.
    async fn logs(&self, handle: &ProcessHandle) -> Result<BoxStream<'static, LogLine>>;

    /// Wait for the process to exit (or time out, or be cancelled).
    async fn wait(&self, handle: &ProcessHandle) -> Result<ProcessResult>;

    /// Ask a running process to stop.
    async fn cancel(&self, handle: &ProcessHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let mut env = HashMap::new();
        env.insert("PROTOC".to_string(), "/opt/protoc".to_string());

        let spec = CommandSpec::new(CommandLine::new("cargo", ["build-all"]), "/work")
            .with_env(env)
            .with_timeout(Some(Duration::from_secs(60)));

        assert_eq!(spec.working_dir, PathBuf::from("/work"));
        assert_eq!(spec.env.get("PROTOC"), Some(&"/opt/protoc".to_string()));
        assert_eq!(spec.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_process_status_success() {
        let now = Utc::now();
        assert!(
            ProcessStatus::Succeeded {
                started_at: now,
                finished_at: now
            }
            .is_success()
        );
        assert!(
            !ProcessStatus::Failed {
                started_at: now,
                finished_at: now,
                exit_code: Some(1),
                message: "exit status 1".to_string(),
            }
            .is_success()
        );
    }
}
