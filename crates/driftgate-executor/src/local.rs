//! Local process executor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftgate_core::executor::*;
use driftgate_core::{Error, ResourceId, Result};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

struct ProcessEntry {
    child: Option<Child>,
    logs: Option<mpsc::UnboundedReceiver<LogLine>>,
    cancel_tx: Option<oneshot::Sender<()>>,
    cancel_rx: Option<oneshot::Receiver<()>>,
    started_at: DateTime<Utc>,
    timeout: Option<Duration>,
    program: String,
    cancelled: bool,
    finished: bool,
}

/// Runs commands as child processes of the orchestrator.
///
/// Output is read line by line from stdout and stderr and buffered until
/// [`Executor::logs`] is called, so a process never stalls on a full pipe.
pub struct LocalProcessExecutor {
    processes: Mutex<HashMap<ResourceId, ProcessEntry>>,
}

impl LocalProcessExecutor {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LocalProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

enum Outcome {
    Exited(std::process::ExitStatus),
    Cancelled,
    TimedOut(Duration),
}

#[async_trait]
impl Executor for LocalProcessExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn spawn(&self, spec: CommandSpec) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&spec.command.program);
        cmd.args(&spec.command.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(command = %spec.command, dir = %spec.working_dir.display(), "Spawning process");
        let mut child = cmd.spawn().map_err(|e| {
            Error::ExecutionFailed(format!("failed to spawn '{}': {}", spec.command, e))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, LogStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, LogStream::Stderr, tx));
        }

        let pid = child.id();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let entry = ProcessEntry {
            child: Some(child),
            logs: Some(rx),
            cancel_tx: Some(cancel_tx),
            cancel_rx: Some(cancel_rx),
            started_at: Utc::now(),
            timeout: spec.timeout,
            program: spec.command.program.clone(),
            cancelled: false,
            finished: false,
        };
        self.processes.lock().await.insert(spec.id, entry);

        Ok(ProcessHandle {
            id: spec.id,
            pid,
            executor_name: self.name().to_string(),
        })
    }

    async fn logs(&self, handle: &ProcessHandle) -> Result<BoxStream<'static, LogLine>> {
        let mut processes = self.processes.lock().await;
        let entry = processes
            .get_mut(&handle.id)
            .ok_or_else(|| Error::NotFound(format!("process {}", handle.id)))?;
        let rx = entry
            .logs
            .take()
            .ok_or_else(|| Error::Conflict(format!("logs of {} already taken", handle.id)))?;
        if entry.finished {
            processes.remove(&handle.id);
        }

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn wait(&self, handle: &ProcessHandle) -> Result<ProcessResult> {
        let (mut child, cancel_rx, started_at, timeout, program) = {
            let mut processes = self.processes.lock().await;
            let entry = processes
                .get_mut(&handle.id)
                .ok_or_else(|| Error::NotFound(format!("process {}", handle.id)))?;
            let child = entry
                .child
                .take()
                .ok_or_else(|| Error::Conflict(format!("process {} already awaited", handle.id)))?;
            let cancel_rx = entry
                .cancel_rx
                .take()
                .ok_or_else(|| Error::Internal("cancel channel missing".to_string()))?;
            (
                child,
                cancel_rx,
                entry.started_at,
                entry.timeout,
                entry.program.clone(),
            )
        };

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status?),
            Ok(()) = cancel_rx => Outcome::Cancelled,
            elapsed = deadline(timeout) => Outcome::TimedOut(elapsed),
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill process");
            }
        }

        let mut cancelled = false;
        {
            let mut processes = self.processes.lock().await;
            if let Some(entry) = processes.get_mut(&handle.id) {
                cancelled = entry.cancelled;
                entry.finished = true;
                entry.cancel_tx = None;
                if entry.logs.is_none() {
                    processes.remove(&handle.id);
                }
            }
        }

        let outcome = match outcome {
            Outcome::Exited(_) if cancelled => Outcome::Cancelled,
            other => other,
        };

        let finished_at = Utc::now();
        let result = match outcome {
            Outcome::Exited(status) if status.success() => ProcessResult {
                status: ProcessStatus::Succeeded {
                    started_at,
                    finished_at,
                },
                exit_code: status.code(),
            },
            Outcome::Exited(status) => ProcessResult {
                status: ProcessStatus::Failed {
                    started_at,
                    finished_at,
                    exit_code: status.code(),
                    message: format!("{} exited with {}", program, status),
                },
                exit_code: status.code(),
            },
            Outcome::Cancelled => ProcessResult {
                status: ProcessStatus::Cancelled {
                    started_at,
                    cancelled_at: finished_at,
                },
                exit_code: None,
            },
            Outcome::TimedOut(after) => ProcessResult {
                status: ProcessStatus::Failed {
                    started_at,
                    finished_at,
                    exit_code: None,
                    message: format!("{} timed out after {}s", program, after.as_secs()),
                },
                exit_code: None,
            },
        };

        debug!(process = %handle.id, status = ?result.status, "Process finished");
        Ok(result)
    }

    async fn cancel(&self, handle: &ProcessHandle) -> Result<()> {
        let mut processes = self.processes.lock().await;
        let entry = processes
            .get_mut(&handle.id)
            .ok_or_else(|| Error::NotFound(format!("process {}", handle.id)))?;
        entry.cancelled = true;

        // Nobody is waiting yet: kill directly
        if let Some(child) = entry.child.as_mut() {
            child
                .start_kill()
                .map_err(|e| Error::ExecutionFailed(format!("failed to kill process: {}", e)))?;
            return Ok(());
        }

        if let Some(tx) = entry.cancel_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(after) => {
            tokio::time::sleep(after).await;
            after
        }
        None => std::future::pending().await,
    }
}

async fn forward_lines<R>(reader: R, stream: LogStream, tx: mpsc::UnboundedSender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(content)) => {
                // Keep draining after the receiver is gone so the child never blocks
                let _ = tx.send(LogLine {
                    timestamp: Utc::now(),
                    stream,
                    content,
                });
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Log stream error");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use driftgate_core::pipeline::CommandLine;
    use futures::StreamExt;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new(
            CommandLine::new("/bin/sh", ["-c", script]),
            std::env::temp_dir(),
        )
    }

    #[tokio::test]
    async fn test_successful_process() {
        let executor = LocalProcessExecutor::new();
        let handle = executor.spawn(sh("exit 0")).await.unwrap();
        assert_eq!(handle.executor_name, "local");
        assert!(handle.pid.is_some());

        let result = executor.wait(&handle).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert!(result.status.is_success());
    }

    #[tokio::test]
    async fn test_failing_process() {
        let executor = LocalProcessExecutor::new();
        let handle = executor.spawn(sh("exit 42")).await.unwrap();
        let result = executor.wait(&handle).await.unwrap();

        assert_eq!(result.exit_code, Some(42));
        match result.status {
            ProcessStatus::Failed { exit_code, .. } => assert_eq!(exit_code, Some(42)),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_log_streaming() {
        let executor = LocalProcessExecutor::new();
        let handle = executor
            .spawn(sh("echo line1; echo line2 >&2; echo line3"))
            .await
            .unwrap();

        let mut stream = executor.logs(&handle).await.unwrap();
        let result = executor.wait(&handle).await.unwrap();
        assert!(result.status.is_success());

        let mut lines = Vec::new();
        while let Some(line) = stream.next().await {
            lines.push(line);
        }

        assert!(lines.iter().any(|l| l.content == "line1"));
        assert!(
            lines
                .iter()
                .any(|l| l.content == "line2" && l.stream == LogStream::Stderr)
        );
        assert!(lines.iter().any(|l| l.content == "line3"));
    }

    #[tokio::test]
    async fn test_logs_after_wait() {
        let executor = LocalProcessExecutor::new();
        let handle = executor.spawn(sh("echo done")).await.unwrap();
        executor.wait(&handle).await.unwrap();

        let lines: Vec<_> = executor.logs(&handle).await.unwrap().collect().await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].content, "done");

        // Entry is gone once both logs and result were consumed
        assert!(matches!(
            executor.logs(&handle).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_environment_variables() {
        let executor = LocalProcessExecutor::new();
        let mut env = HashMap::new();
        env.insert("PROTOC".to_string(), "/opt/protoc/bin/protoc".to_string());

        let handle = executor
            .spawn(sh("echo $PROTOC").with_env(env))
            .await
            .unwrap();
        executor.wait(&handle).await.unwrap();

        let lines: Vec<_> = executor.logs(&handle).await.unwrap().collect().await;
        assert!(lines.iter().any(|l| l.content == "/opt/protoc/bin/protoc"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let executor = LocalProcessExecutor::new();
        let handle = executor
            .spawn(sh("sleep 30").with_timeout(Some(Duration::from_millis(100))))
            .await
            .unwrap();

        let result = executor.wait(&handle).await.unwrap();
        match result.status {
            ProcessStatus::Failed { message, .. } => assert!(message.contains("timed out")),
            other => panic!("Expected timeout failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation() {
        let executor = std::sync::Arc::new(LocalProcessExecutor::new());
        let handle = executor.spawn(sh("sleep 30")).await.unwrap();

        let waiter = {
            let executor = executor.clone();
            let handle = handle.clone();
            tokio::spawn(async move { executor.wait(&handle).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.cancel(&handle).await.unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert!(matches!(result.status, ProcessStatus::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let executor = LocalProcessExecutor::new();
        let spec = CommandSpec::new(
            CommandLine::new("definitely-not-a-real-program-driftgate", Vec::<String>::new()),
            std::env::temp_dir(),
        );
        assert!(matches!(
            executor.spawn(spec).await,
            Err(Error::ExecutionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_twice_conflicts() {
        let executor = LocalProcessExecutor::new();
        let handle = executor.spawn(sh("exit 0")).await.unwrap();
        let _stream = executor.logs(&handle).await.unwrap();
        executor.wait(&handle).await.unwrap();
        assert!(matches!(
            executor.wait(&handle).await,
            Err(Error::NotFound(_))
        ));
    }
}
