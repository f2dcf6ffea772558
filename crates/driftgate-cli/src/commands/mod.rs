//! CLI command implementations.

pub mod plan;
pub mod run;

use anyhow::{Context, Result};
use driftgate_config::load_pipeline;
use driftgate_core::pipeline::Pipeline;

pub fn load(path: &str) -> Result<Pipeline> {
    load_pipeline(path).with_context(|| format!("Failed to load pipeline config: {}", path))
}

pub fn validate(path: &str) -> Result<()> {
    let pipeline = load(path)?;
    let maintenance = pipeline.jobs.iter().filter(|j| j.is_maintenance()).count();
    println!(
        "Configuration is valid: pipeline '{}' with {} jobs ({} maintenance)",
        pipeline.name,
        pipeline.jobs.len(),
        maintenance
    );
    Ok(())
}
