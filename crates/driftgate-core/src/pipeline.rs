//! Pipeline, job and step definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::ResourceId;
use crate::event::EventKind;
use crate::maintenance::CancelSpec;
use crate::pattern::FilterPattern;
use crate::tool::FetchSpec;
use crate::toolchain::ToolchainSpec;

/// A CI pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Unique identifier, assigned at parse time.
    pub id: ResourceId,
    /// Pipeline name (e.g., "ci").
    pub name: String,
    /// Events that can start this pipeline.
    pub triggers: Vec<Trigger>,
    /// Jobs, in declaration order. Jobs never depend on each other.
    pub jobs: Vec<Job>,
    /// Environment variables passed to every job.
    pub env: HashMap<String, String>,
}

impl Pipeline {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Which events start the pipeline. Held as data so predicates can be
/// evaluated without running anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: EventKind,
    /// Branch allow-list. Empty together with `tags` means every ref.
    pub branches: Vec<FilterPattern>,
    /// Tag allow-list.
    pub tags: Vec<FilterPattern>,
    /// Paths whose changes alone never start a run.
    pub paths_ignore: Vec<FilterPattern>,
}

impl Trigger {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            branches: Vec::new(),
            tags: Vec::new(),
            paths_ignore: Vec::new(),
        }
    }
}

/// What a job is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRole {
    /// Counts towards the pipeline outcome.
    Build,
    /// Best-effort housekeeping; reported but never gates the pipeline.
    Maintenance,
}

/// Toolchain a job runs with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvironment {
    pub toolchain: Option<String>,
    /// Secondary compilation target (e.g. `wasm32-unknown-unknown`).
    pub target: Option<String>,
}

/// Ref predicate deciding whether a job runs for an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPredicate {
    /// If non-empty, the job runs only for refs matching one of these.
    pub only_refs: Vec<FilterPattern>,
    /// The job never runs for refs matching one of these.
    pub unless_refs: Vec<FilterPattern>,
}

impl JobPredicate {
    pub fn is_unconditional(&self) -> bool {
        self.only_refs.is_empty() && self.unless_refs.is_empty()
    }
}

/// An independently scheduled unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub role: JobRole,
    pub environment: JobEnvironment,
    pub predicate: JobPredicate,
    /// Steps, executed strictly in order.
    pub steps: Vec<Step>,
    /// Job-specific environment variables.
    pub env: HashMap<String, String>,
}

impl Job {
    pub fn is_maintenance(&self) -> bool {
        self.role == JobRole::Maintenance
    }

    /// The first plain build command of this job, if any.
    pub fn primary_build_command(&self) -> Option<&CommandLine> {
        self.steps.iter().find_map(|s| match &s.action {
            Action::Build(cmd) => Some(cmd),
            _ => None,
        })
    }
}

/// One ordered unit of work inside a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub action: Action,
    /// Upper bound on the step's runtime, if any.
    pub timeout: Option<Duration>,
}

/// What a step does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    /// Install the compiler toolchain and optional extra target.
    Provision(ToolchainSpec),
    /// Download and unpack a versioned tool.
    Fetch(FetchSpec),
    /// Run the schema compiler over the schema tree.
    Regenerate(RegenerateSpec),
    /// Run a build command.
    Build(CommandLine),
    /// Full workspace build gating the regenerated tree.
    Verify(VerifySpec),
    /// Cancel stale in-flight runs for the same ref.
    CancelStaleRuns(CancelSpec),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Provision(_) => "provision",
            Action::Fetch(_) => "fetch",
            Action::Regenerate(_) => "regenerate",
            Action::Build(_) => "build",
            Action::Verify(_) => "verify",
            Action::CancelStaleRuns(_) => "cancel-stale",
        }
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Regeneration of the generated source tree from the schema tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerateSpec {
    /// Name of the fetched tool whose location the command receives.
    pub tool: String,
    /// Repository-relative schema source root.
    pub schema_root: PathBuf,
    /// Repository-relative generated source root.
    pub output_root: PathBuf,
    pub command: CommandLine,
}

/// How the verifier treats regenerated output that differs from the
/// committed baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Compile check only.
    #[default]
    Off,
    /// Log changed files, still pass.
    Warn,
    /// Changed files fail the job.
    Fail,
}

impl std::str::FromStr for DriftPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "off" => Ok(DriftPolicy::Off),
            "warn" => Ok(DriftPolicy::Warn),
            "fail" => Ok(DriftPolicy::Fail),
            other => Err(format!("unknown drift policy: {}", other)),
        }
    }
}

/// Consistency verification of a regenerated tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySpec {
    pub command: CommandLine,
    pub drift: DriftPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_display() {
        let cmd = CommandLine::new("cargo", ["build-all"]);
        assert_eq!(cmd.to_string(), "cargo build-all");
    }

    #[test]
    fn test_primary_build_command() {
        let job = Job {
            name: "build".to_string(),
            role: JobRole::Build,
            environment: JobEnvironment::default(),
            predicate: JobPredicate::default(),
            steps: vec![
                Step {
                    name: "provision".to_string(),
                    action: Action::Provision(ToolchainSpec::new("stable")),
                    timeout: None,
                },
                Step {
                    name: "build-all".to_string(),
                    action: Action::Build(CommandLine::new("cargo", ["build-all"])),
                    timeout: None,
                },
            ],
            env: HashMap::new(),
        };
        assert_eq!(
            job.primary_build_command(),
            Some(&CommandLine::new("cargo", ["build-all"]))
        );
        assert!(!job.is_maintenance());
    }

    #[test]
    fn test_drift_policy_parse() {
        assert_eq!("warn".parse::<DriftPolicy>().unwrap(), DriftPolicy::Warn);
        assert!("strict".parse::<DriftPolicy>().is_err());
        assert_eq!(DriftPolicy::default(), DriftPolicy::Off);
    }
}
