//! Dry-run planning command.

use anyhow::Result;
use driftgate_core::event::TriggerEvent;
use driftgate_core::pipeline::Job;
use driftgate_scheduler::plan;

use super::load;

/// Print the jobs `event` would run, without running anything.
pub fn show(config_path: &str, event: &TriggerEvent, json: bool) -> Result<()> {
    let pipeline = load(config_path)?;
    let plan = plan(&pipeline, event);

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!(
        "Pipeline '{}' for {} {}",
        pipeline.name, event.kind, event.git_ref
    );
    if plan.is_empty() {
        println!("  not triggered, no jobs would run");
        return Ok(());
    }

    for job in &plan.jobs {
        print_job(job, "build");
    }
    for job in &plan.maintenance {
        print_job(job, "maintenance");
    }

    let skipped: Vec<&str> = pipeline
        .jobs
        .iter()
        .map(|j| j.name.as_str())
        .filter(|name| !plan.job_names().contains(name))
        .collect();
    if !skipped.is_empty() {
        println!("  skipped by predicate: {}", skipped.join(", "));
    }
    Ok(())
}

fn print_job(job: &Job, role: &str) {
    println!("  {} ({})", job.name, role);
    for (idx, step) in job.steps.iter().enumerate() {
        println!("    {}. [{}] {}", idx + 1, step.action.kind(), step.name);
    }
}
