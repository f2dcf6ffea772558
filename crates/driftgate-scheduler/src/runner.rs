//! Runs the steps of one job inside its own checkout.

use driftgate_config::VariableContext;
use driftgate_core::bindings::{JobBindings, RegenerationReport, StepOutput};
use driftgate_core::checkout::{CheckoutProvider, JobCheckout};
use driftgate_core::event::TriggerEvent;
use driftgate_core::executor::{CommandSpec, Executor, ProcessStatus};
use driftgate_core::maintenance::RunCanceller;
use driftgate_core::pipeline::{
    Action, CommandLine, DriftPolicy, Job, JobRole, RegenerateSpec, Step, VerifySpec,
};
use driftgate_core::tool::ToolFetcher;
use driftgate_core::toolchain::ToolchainProvisioner;
use driftgate_core::{Error, FailureKind, Result};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::drift::TreeSnapshot;
use crate::orchestrator::PipelineEvent;

/// Directory, relative to a checkout, that fetched tools are unpacked into.
pub const TOOLS_DIR: &str = ".driftgate/tools";

/// How long to keep draining output after a process has exited.
const LOG_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// External collaborators a job needs.
#[derive(Clone)]
pub struct Toolbox {
    pub executor: Arc<dyn Executor>,
    pub provisioner: Arc<dyn ToolchainProvisioner>,
    pub fetcher: Arc<dyn ToolFetcher>,
    pub canceller: Arc<dyn RunCanceller>,
    pub checkout: Arc<dyn CheckoutProvider>,
}

/// Outcome of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub action: &'static str,
    pub success: bool,
    pub duration_ms: u64,
}

/// Final state of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Succeeded,
    Failed {
        step: String,
        kind: FailureKind,
        message: String,
    },
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    pub role: JobRole,
    pub state: JobState,
    pub steps: Vec<StepReport>,
    pub bindings: JobBindings,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        matches!(self.state, JobState::Succeeded)
    }

    fn failed(job: &Job, step: &str, error: &Error) -> Self {
        Self {
            name: job.name.clone(),
            role: job.role,
            state: JobState::Failed {
                step: step.to_string(),
                kind: error.kind(),
                message: error.to_string(),
            },
            steps: Vec::new(),
            bindings: JobBindings::new(),
        }
    }
}

/// Executes a single job. Steps run strictly in order and the first
/// failing step ends the job.
///
/// Once `true` is published on the cancel channel the running command is
/// killed and no further step starts.
pub struct JobRunner {
    toolbox: Toolbox,
    event: TriggerEvent,
    pipeline_env: HashMap<String, String>,
    tx: mpsc::Sender<PipelineEvent>,
    cancel: watch::Receiver<bool>,
}

impl JobRunner {
    pub fn new(
        toolbox: Toolbox,
        event: TriggerEvent,
        pipeline_env: HashMap<String, String>,
        tx: mpsc::Sender<PipelineEvent>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            toolbox,
            event,
            pipeline_env,
            tx,
            cancel,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub async fn run(&self, job: &Job, mut var_ctx: VariableContext) -> JobReport {
        var_ctx.job.name = job.name.clone();
        var_ctx.job.toolchain = job.environment.toolchain.clone();
        var_ctx.job.target = job.environment.target.clone();

        let _ = self
            .tx
            .send(PipelineEvent::JobStarted {
                job: job.name.clone(),
                maintenance: job.is_maintenance(),
            })
            .await;

        let checkout = match self.toolbox.checkout.prepare(&job.name).await {
            Ok(checkout) => checkout,
            Err(e) => {
                error!(job = %job.name, error = %e, "Checkout failed");
                let report = JobReport::failed(job, "checkout", &e);
                self.complete(&report).await;
                return report;
            }
        };
        info!(job = %job.name, root = %checkout.root.display(), "Job checkout ready");

        let report = self.run_steps(job, &checkout, &mut var_ctx).await;

        if checkout.ephemeral {
            if let Err(e) = self.toolbox.checkout.release(checkout).await {
                warn!(job = %job.name, error = %e, "Failed to release checkout");
            }
        }

        self.complete(&report).await;
        report
    }

    async fn complete(&self, report: &JobReport) {
        let _ = self
            .tx
            .send(PipelineEvent::JobCompleted {
                job: report.name.clone(),
                success: report.is_success(),
            })
            .await;
    }

    async fn run_steps(
        &self,
        job: &Job,
        checkout: &JobCheckout,
        var_ctx: &mut VariableContext,
    ) -> JobReport {
        let mut bindings = JobBindings::new();
        let mut steps = Vec::with_capacity(job.steps.len());
        let mut state = JobState::Succeeded;

        for (index, step) in job.steps.iter().enumerate() {
            if self.is_cancelled() {
                warn!(job = %job.name, step = %step.name, "Run cancelled before step");
                state = JobState::Failed {
                    step: step.name.clone(),
                    kind: Error::Cancelled.kind(),
                    message: Error::Cancelled.to_string(),
                };
                break;
            }
            var_ctx.job.step = step.name.clone();
            var_ctx.job.step_index = index;

            let _ = self
                .tx
                .send(PipelineEvent::StepStarted {
                    job: job.name.clone(),
                    step: step.name.clone(),
                    index,
                })
                .await;
            info!(job = %job.name, step = %step.name, action = step.action.kind(), "Step started");

            let started = Instant::now();
            let result = self
                .execute_step(job, step, checkout, &bindings, var_ctx)
                .await;
            let success = result.is_ok();

            steps.push(StepReport {
                name: step.name.clone(),
                action: step.action.kind(),
                success,
                duration_ms: started.elapsed().as_millis() as u64,
            });
            let _ = self
                .tx
                .send(PipelineEvent::StepCompleted {
                    job: job.name.clone(),
                    step: step.name.clone(),
                    success,
                })
                .await;

            match result {
                Ok(output) => {
                    bindings.apply(output);
                    var_ctx.bind(&bindings);
                }
                Err(e) => {
                    error!(job = %job.name, step = %step.name, error = %e, "Step failed");
                    state = JobState::Failed {
                        step: step.name.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    };
                    break;
                }
            }
        }

        JobReport {
            name: job.name.clone(),
            role: job.role,
            state,
            steps,
            bindings,
        }
    }

    async fn execute_step(
        &self,
        job: &Job,
        step: &Step,
        checkout: &JobCheckout,
        bindings: &JobBindings,
        var_ctx: &VariableContext,
    ) -> Result<StepOutput> {
        match &step.action {
            Action::Provision(spec) => {
                let toolchain = self.toolbox.provisioner.provision(spec).await?;
                Ok(StepOutput::Toolchain(toolchain))
            }
            Action::Fetch(spec) => {
                let dest = checkout.root.join(TOOLS_DIR);
                let tool = self.toolbox.fetcher.fetch(spec, &dest).await?;
                info!(job = %job.name, tool = %tool.name, path = %tool.path.display(), "Tool ready");
                Ok(StepOutput::Tool(tool))
            }
            Action::Regenerate(spec) => {
                let report = self
                    .regenerate(job, step, spec, checkout, bindings, var_ctx)
                    .await?;
                Ok(StepOutput::Regenerated(report))
            }
            Action::Build(command) => {
                self.run_command(job, step, command, checkout, bindings, var_ctx, Error::Build)
                    .await?;
                Ok(StepOutput::None)
            }
            Action::Verify(spec) => {
                self.verify(job, step, spec, checkout, bindings, var_ctx)
                    .await?;
                Ok(StepOutput::None)
            }
            Action::CancelStaleRuns(spec) => {
                let report = self.toolbox.canceller.cancel_stale(spec, &self.event).await?;
                info!(job = %job.name, cancelled = report.cancelled.len(), "Stale runs cancelled");
                Ok(StepOutput::Cancelled(report))
            }
        }
    }

    async fn regenerate(
        &self,
        job: &Job,
        step: &Step,
        spec: &RegenerateSpec,
        checkout: &JobCheckout,
        bindings: &JobBindings,
        var_ctx: &VariableContext,
    ) -> Result<RegenerationReport> {
        let tool = bindings.tool(&spec.tool)?;

        let schema_root = checkout.root.join(&spec.schema_root);
        if !schema_root.is_dir() {
            return Err(Error::Regeneration(format!(
                "schema root {} does not exist",
                spec.schema_root.display()
            )));
        }

        let output_root = checkout.root.join(&spec.output_root);
        let before = TreeSnapshot::capture_async(output_root.clone()).await?;

        info!(job = %job.name, tool = %tool.name, version = %tool.version, "Regenerating sources");

        let mut ctx = var_ctx.clone();
        ctx.job.schema = Some(schema_root.to_string_lossy().into_owned());
        ctx.job.output = Some(output_root.to_string_lossy().into_owned());

        self.run_command(job, step, &spec.command, checkout, bindings, &ctx, Error::Regeneration)
            .await?;

        let after = TreeSnapshot::capture_async(output_root).await?;
        let report = RegenerationReport {
            output_root: spec.output_root.clone(),
            files: after.len(),
            digest: after.digest(),
            changed: before.changed(&after),
        };
        info!(
            job = %job.name,
            output = %spec.output_root.display(),
            files = report.files,
            changed = report.changed.len(),
            digest = %report.digest,
            "Regenerated sources"
        );
        Ok(report)
    }

    async fn verify(
        &self,
        job: &Job,
        step: &Step,
        spec: &VerifySpec,
        checkout: &JobCheckout,
        bindings: &JobBindings,
        var_ctx: &VariableContext,
    ) -> Result<()> {
        self.run_command(job, step, &spec.command, checkout, bindings, var_ctx, Error::Build)
            .await?;

        if spec.drift == DriftPolicy::Off {
            return Ok(());
        }
        let report = bindings.regeneration.as_ref().ok_or_else(|| {
            Error::MissingBinding("no regeneration ran before drift check".to_string())
        })?;
        if !report.has_drift() {
            info!(job = %job.name, output = %report.output_root.display(), "No drift in generated sources");
            return Ok(());
        }

        let changed: Vec<String> = report
            .changed
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        match spec.drift {
            DriftPolicy::Fail => Err(Error::Build(format!(
                "generated sources under {} differ from the committed tree: {}",
                report.output_root.display(),
                changed.join(", ")
            ))),
            _ => {
                warn!(job = %job.name, output = %report.output_root.display(), changed = ?changed, "Generated sources drifted");
                Ok(())
            }
        }
    }

    /// Run one command to completion, forwarding its output as step logs.
    ///
    /// Every tool fetched earlier in the job is exported through its
    /// variable and its directory is put first on `PATH`.
    #[allow(clippy::too_many_arguments)]
    async fn run_command(
        &self,
        job: &Job,
        step: &Step,
        command: &CommandLine,
        checkout: &JobCheckout,
        bindings: &JobBindings,
        var_ctx: &VariableContext,
        failure: fn(String) -> Error,
    ) -> Result<()> {
        let command = CommandLine {
            program: var_ctx.interpolate(&command.program),
            args: var_ctx.interpolate_vec(&command.args),
        };

        let mut env = self.pipeline_env.clone();
        env.extend(job.env.clone());
        let mut env = var_ctx.interpolate_map(&env);
        if let Some(toolchain) = &var_ctx.job.toolchain {
            env.insert("RUSTUP_TOOLCHAIN".to_string(), toolchain.clone());
        }
        let tools = tool_env(bindings, env.get("PATH").map(String::as_str))?;
        env.extend(tools);

        let spec = CommandSpec::new(command.clone(), &checkout.root)
            .with_env(env)
            .with_timeout(step.timeout);

        info!(job = %job.name, step = %step.name, command = %command, "Running command");
        let executor = &self.toolbox.executor;
        let handle = executor
            .spawn(spec)
            .await
            .map_err(|e| failure(format!("failed to start `{}`: {}", command, e)))?;
        let mut stream = executor
            .logs(&handle)
            .await
            .map_err(|e| failure(format!("failed to read output of `{}`: {}", command, e)))?;

        let tx = self.tx.clone();
        let job_name = job.name.clone();
        let step_name = step.name.clone();
        let mut log_task = tokio::spawn(async move {
            while let Some(line) = stream.next().await {
                let _ = tx
                    .send(PipelineEvent::StepLog {
                        job: job_name.clone(),
                        step: step_name.clone(),
                        line,
                    })
                    .await;
            }
        });

        let wait = executor.wait(&handle);
        tokio::pin!(wait);
        let mut cancel = self.cancel.clone();
        let result = tokio::select! {
            result = &mut wait => result,
            _ = cancel_requested(&mut cancel) => {
                warn!(job = %job.name, step = %step.name, "Cancelling running command");
                if let Err(e) = executor.cancel(&handle).await {
                    warn!(job = %job.name, error = %e, "Failed to cancel command");
                }
                wait.await
            }
        };

        // Grandchildren may keep the pipes open after the process exits
        if tokio::time::timeout(LOG_DRAIN_GRACE, &mut log_task).await.is_err() {
            log_task.abort();
        }

        match result?.status {
            ProcessStatus::Succeeded { .. } => Ok(()),
            ProcessStatus::Failed { message, .. } => {
                Err(failure(format!("`{}` failed: {}", command, message)))
            }
            ProcessStatus::Cancelled { .. } => Err(Error::Cancelled),
        }
    }
}

/// Resolves once cancellation is requested. A dropped sender never cancels.
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    let requested = cancel.wait_for(|cancelled| *cancelled).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

/// Variables exposing the fetched tools of a job, plus a `PATH` with their
/// directories in front of `base` (or of the orchestrator's own `PATH`).
fn tool_env(bindings: &JobBindings, base: Option<&str>) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    if bindings.tools.is_empty() {
        return Ok(env);
    }

    let mut dirs = Vec::new();
    for tool in bindings.tools.values() {
        env.insert(tool.env_var.clone(), tool.path.to_string_lossy().to_string());
        if let Some(dir) = tool.bin_dir() {
            dirs.push(dir.to_path_buf());
        }
    }
    env.insert("PATH".to_string(), prepend_path(dirs, base)?);
    Ok(env)
}

fn prepend_path(dirs: Vec<PathBuf>, base: Option<&str>) -> Result<String> {
    let existing = match base {
        Some(path) => path.into(),
        None => std::env::var_os("PATH").unwrap_or_default(),
    };
    let paths = dirs.into_iter().chain(std::env::split_paths(&existing));
    let joined = std::env::join_paths(paths)
        .map_err(|e| Error::InvalidInput(format!("invalid PATH entry: {}", e)))?;
    Ok(joined.to_string_lossy().to_string())
}
