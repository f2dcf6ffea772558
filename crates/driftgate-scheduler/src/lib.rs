//! Job planning and execution for driftgate.
//!
//! Turns a trigger event into a plan of jobs and runs them concurrently,
//! each in its own checkout with its own bindings.

pub mod drift;
pub mod orchestrator;
pub mod runner;
pub mod trigger;

pub use orchestrator::{PipelineEvent, PipelineOrchestrator, PipelineResult};
pub use runner::{JobReport, JobRunner, JobState, StepReport, Toolbox};
pub use trigger::{Plan, plan, should_run, should_trigger};
