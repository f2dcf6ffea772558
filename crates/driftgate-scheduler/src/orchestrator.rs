//! Pipeline orchestrator - runs the planned jobs of a pipeline concurrently,
//! or one after another when they share a working tree.

use driftgate_config::VariableContext;
use driftgate_core::ResourceId;
use driftgate_core::event::TriggerEvent;
use driftgate_core::executor::LogLine;
use driftgate_core::pipeline::{Job, JobRole, Pipeline};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::runner::{JobReport, JobRunner, JobState, Toolbox};
use crate::trigger::{self, Plan};

/// Event emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    JobStarted {
        job: String,
        maintenance: bool,
    },
    StepStarted {
        job: String,
        step: String,
        index: usize,
    },
    StepLog {
        job: String,
        step: String,
        line: LogLine,
    },
    StepCompleted {
        job: String,
        step: String,
        success: bool,
    },
    JobCompleted {
        job: String,
        success: bool,
    },
    PipelineCompleted {
        success: bool,
    },
}

/// Result of a pipeline execution.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub run_id: ResourceId,
    /// AND over the build jobs. Maintenance jobs never affect it.
    pub success: bool,
    /// False when the event did not trigger the pipeline at all.
    pub triggered: bool,
    pub jobs: BTreeMap<String, JobReport>,
    pub maintenance: BTreeMap<String, JobReport>,
}

/// Orchestrates the execution of a pipeline.
pub struct PipelineOrchestrator {
    toolbox: Toolbox,
    cancel: watch::Receiver<bool>,
    sequential: bool,
}

impl PipelineOrchestrator {
    pub fn new(toolbox: Toolbox) -> Self {
        let (_, cancel) = watch::channel(false);
        Self {
            toolbox,
            cancel,
            sequential: false,
        }
    }

    /// Abort running commands and skip remaining steps once `true` is sent.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run jobs one at a time. Required when every job shares one checkout.
    pub fn sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    /// Plan and execute a pipeline for `event`, returning a channel of events
    /// and a handle to get the final result.
    ///
    /// The `var_ctx` provides variable interpolation for commands and
    /// environment variables. Without one, a context is built from the event
    /// and the current process environment.
    pub fn execute(
        &self,
        pipeline: &Pipeline,
        event: &TriggerEvent,
        var_ctx: Option<VariableContext>,
    ) -> (mpsc::Receiver<PipelineEvent>, JoinHandle<PipelineResult>) {
        let plan = trigger::plan(pipeline, event);
        self.execute_plan(pipeline, plan, event, var_ctx)
    }

    /// Execute an already computed plan.
    pub fn execute_plan(
        &self,
        pipeline: &Pipeline,
        plan: Plan,
        event: &TriggerEvent,
        var_ctx: Option<VariableContext>,
    ) -> (mpsc::Receiver<PipelineEvent>, JoinHandle<PipelineResult>) {
        let (tx, rx) = mpsc::channel(100);
        let run_id = ResourceId::new();
        let var_ctx = var_ctx.unwrap_or_else(|| {
            let mut ctx = VariableContext::for_event(event, &pipeline.name, &run_id.to_string());
            ctx.populate_env();
            ctx
        });
        let setup = RunnerSetup {
            toolbox: self.toolbox.clone(),
            event: event.clone(),
            pipeline_env: pipeline.env.clone(),
            cancel: self.cancel.clone(),
            tx,
        };
        let sequential = self.sequential;

        let handle = tokio::spawn(async move {
            Self::execute_inner(setup, run_id, plan, var_ctx, sequential).await
        });

        (rx, handle)
    }

    async fn execute_inner(
        setup: RunnerSetup,
        run_id: ResourceId,
        plan: Plan,
        var_ctx: VariableContext,
        sequential: bool,
    ) -> PipelineResult {
        let triggered = !plan.is_empty();
        if !triggered {
            info!(run = %run_id, event = %setup.event.kind, git_ref = %setup.event.git_ref, "Event does not trigger any job");
        }

        let spawn = |job: Job| {
            let runner = setup.runner();
            let ctx = var_ctx.clone();
            let name = job.name.clone();
            let role = job.role;
            let handle = tokio::spawn(async move { runner.run(&job, ctx).await });
            (name, role, handle)
        };

        let (jobs, maintenance) = if sequential {
            info!(run = %run_id, jobs = plan.jobs.len(), maintenance = plan.maintenance.len(), "Running jobs one at a time");
            let mut maintenance = BTreeMap::new();
            for job in plan.maintenance {
                maintenance.extend(collect(vec![spawn(job)]).await);
            }
            let mut jobs = BTreeMap::new();
            for job in plan.jobs {
                jobs.extend(collect(vec![spawn(job)]).await);
            }
            (jobs, maintenance)
        } else {
            // Everything is spawned before anything is awaited, so jobs run
            // concurrently and one failure never stops the others.
            let maintenance: Vec<_> = plan.maintenance.into_iter().map(&spawn).collect();
            let jobs: Vec<_> = plan.jobs.into_iter().map(&spawn).collect();
            info!(run = %run_id, jobs = jobs.len(), maintenance = maintenance.len(), "Jobs scheduled");
            (collect(jobs).await, collect(maintenance).await)
        };

        for report in maintenance.values().filter(|r| !r.is_success()) {
            warn!(job = %report.name, "Maintenance job failed");
        }

        let success = jobs.values().all(|r| r.is_success());
        info!(run = %run_id, success, "Pipeline completed");
        let _ = setup
            .tx
            .send(PipelineEvent::PipelineCompleted { success })
            .await;

        PipelineResult {
            run_id,
            success,
            triggered,
            jobs,
            maintenance,
        }
    }
}

/// Everything a [`JobRunner`] needs, shared by all jobs of one run.
struct RunnerSetup {
    toolbox: Toolbox,
    event: TriggerEvent,
    pipeline_env: HashMap<String, String>,
    cancel: watch::Receiver<bool>,
    tx: mpsc::Sender<PipelineEvent>,
}

impl RunnerSetup {
    fn runner(&self) -> JobRunner {
        JobRunner::new(
            self.toolbox.clone(),
            self.event.clone(),
            self.pipeline_env.clone(),
            self.tx.clone(),
            self.cancel.clone(),
        )
    }
}

async fn collect(
    handles: Vec<(String, JobRole, JoinHandle<JobReport>)>,
) -> BTreeMap<String, JobReport> {
    let mut reports = BTreeMap::new();
    for (name, role, handle) in handles {
        let report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(job = %name, error = %e, "Job task panicked");
                JobReport {
                    name: name.clone(),
                    role,
                    state: JobState::Failed {
                        step: String::new(),
                        kind: driftgate_core::FailureKind::Other,
                        message: format!("job task failed: {}", e),
                    },
                    steps: Vec::new(),
                    bindings: Default::default(),
                }
            }
        };
        reports.insert(name, report);
    }
    reports
}
