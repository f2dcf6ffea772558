//! Local pipeline execution command.

use anyhow::{Context, Result};
use clap::ValueEnum;
use driftgate_core::checkout::CheckoutProvider;
use driftgate_core::event::TriggerEvent;
use driftgate_core::executor::LogStream;
use driftgate_core::pipeline::Action;
use driftgate_executor::{
    GitWorktreeCheckout, GithubRunCanceller, HttpToolFetcher, InPlaceCheckout,
    LocalProcessExecutor, RustupProvisioner,
};
use driftgate_scheduler::{JobReport, JobState, PipelineEvent, PipelineOrchestrator, Toolbox, plan};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::load;

/// How each job gets its working copy.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Isolation {
    /// A detached git worktree per job
    Worktree,
    /// Every job runs in the repository directory itself, one at a time
    InPlace,
}

pub struct RunOptions {
    pub repo: String,
    pub isolation: Isolation,
    pub jobs: Vec<String>,
    pub json: bool,
}

/// Run the jobs `event` triggers against a local repository.
pub async fn run(config_path: &str, event: TriggerEvent, options: RunOptions) -> Result<()> {
    let pipeline = load(config_path)?;

    let mut plan = plan(&pipeline, &event);
    if !options.jobs.is_empty() {
        for name in &options.jobs {
            if pipeline.job(name).is_none() {
                anyhow::bail!("Unknown job: {}", name);
            }
        }
        plan.retain(&options.jobs);
        println!("Running filtered jobs: {:?}", options.jobs);
    }

    let repo = std::path::Path::new(&options.repo)
        .canonicalize()
        .with_context(|| format!("Failed to resolve repository: {}", options.repo))?;

    let checkout: Arc<dyn CheckoutProvider> = match options.isolation {
        Isolation::Worktree => Arc::new(GitWorktreeCheckout::new(&repo)),
        Isolation::InPlace => {
            let regenerates = plan
                .jobs
                .iter()
                .flat_map(|job| &job.steps)
                .any(|step| matches!(step.action, Action::Regenerate(_)));
            if regenerates {
                warn!(repo = %repo.display(), "Regenerated sources are written into the working copy");
            }
            Arc::new(InPlaceCheckout::new(&repo))
        }
    };
    let sequential = matches!(options.isolation, Isolation::InPlace);
    if sequential {
        info!("Jobs share the repository directory and run one at a time");
    }

    let toolbox = Toolbox {
        executor: Arc::new(LocalProcessExecutor::new()),
        provisioner: Arc::new(RustupProvisioner::new()),
        fetcher: Arc::new(HttpToolFetcher::new()),
        canceller: Arc::new(GithubRunCanceller::new()),
        checkout,
    };
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running jobs");
            let _ = cancel_tx.send(true);
        }
    });

    let orchestrator = PipelineOrchestrator::new(toolbox)
        .with_cancel(cancel_rx)
        .sequential(sequential);

    println!("Running pipeline: {}", pipeline.name);
    println!("Event: {} {}", event.kind, event.git_ref);
    println!("Repository: {}", repo.display());
    println!("\n--- Starting pipeline execution ---\n");

    let (mut rx, result_handle) = orchestrator.execute_plan(&pipeline, plan, &event, None);

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::JobStarted { job, maintenance } => {
                if maintenance {
                    println!("▶ Job '{}' started (maintenance)", job);
                } else {
                    println!("▶ Job '{}' started", job);
                }
            }
            PipelineEvent::StepStarted { job, step, index } => {
                println!("  [{}] step {}: {}", job, index + 1, step);
            }
            PipelineEvent::StepLog { job, line, .. } => {
                let stream_marker = match line.stream {
                    LogStream::Stdout => " ",
                    LogStream::Stderr => "!",
                    LogStream::System => "*",
                };
                println!("  [{}]{} {}", job, stream_marker, line.content);
            }
            PipelineEvent::StepCompleted { job, step, success } => {
                if !success {
                    println!("  [{}] step '{}' failed", job, step);
                }
            }
            PipelineEvent::JobCompleted { job, success } => {
                if success {
                    println!("✓ Job '{}' completed successfully\n", job);
                } else {
                    println!("✗ Job '{}' failed\n", job);
                }
            }
            PipelineEvent::PipelineCompleted { success } => {
                if success {
                    println!("--- Pipeline completed successfully ---");
                } else {
                    println!("--- Pipeline failed ---");
                }
            }
        }
    }

    let result = result_handle
        .await
        .context("Pipeline execution task failed")?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if !result.triggered {
            println!("\nEvent does not trigger any job");
        }
        print_summary("Job Summary", &result.jobs);
        print_summary("Maintenance", &result.maintenance);
    }

    if result.success {
        println!("\n✓ Pipeline succeeded!");
        Ok(())
    } else {
        anyhow::bail!("Pipeline failed");
    }
}

fn print_summary(title: &str, reports: &BTreeMap<String, JobReport>) {
    if reports.is_empty() {
        return;
    }
    println!("\n--- {} ---", title);
    for (name, report) in reports {
        let status = match &report.state {
            JobState::Succeeded => "✓ succeeded".to_string(),
            JobState::Failed {
                step,
                kind,
                message,
            } => format!("✗ failed at '{}' ({:?}): {}", step, kind, message),
        };
        println!("  {} - {}", name, status);
    }
}
