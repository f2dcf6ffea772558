//! Pipeline configuration parsing.
//!
//! ```kdl
//! pipeline "ci"
//!
//! on "push" {
//!     branches "main"
//!     tags "v[0-9]+.[0-9]+.[0-9]+"
//!     paths-ignore "docs/**" "**.md"
//! }
//!
//! job "build" {
//!     toolchain "stable"
//!     build "cargo" "build-all"
//! }
//!
//! job "protobuf" {
//!     toolchain "stable"
//!     fetch "protoc" version="3.19.4"
//!     regenerate "cargo" "run" "-p" "proto-compiler" schema="proto" output="proto/src/prost"
//!     verify like="build"
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use driftgate_core::ResourceId;
use driftgate_core::event::EventKind;
use driftgate_core::maintenance::CancelSpec;
use driftgate_core::pattern::FilterPattern;
use driftgate_core::pipeline::{
    Action, CommandLine, DriftPolicy, Job, JobEnvironment, JobPredicate, JobRole, Pipeline,
    RegenerateSpec, Step, Trigger, VerifySpec,
};
use driftgate_core::tool::{FetchSpec, host_platform};
use driftgate_core::toolchain::ToolchainSpec;
use kdl::{KdlDocument, KdlNode};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_RELEASE_BASE: &str = "https://github.com/protocolbuffers/protobuf/releases/download";

/// Read and parse a pipeline file.
pub fn load_pipeline(path: impl AsRef<Path>) -> ConfigResult<Pipeline> {
    let content = std::fs::read_to_string(path)?;
    parse_pipeline(&content)
}

/// Parse a pipeline configuration from KDL text.
pub fn parse_pipeline(kdl: &str) -> ConfigResult<Pipeline> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut triggers = Vec::new();
    let mut jobs = Vec::new();
    let mut pending_likes = Vec::new();
    let mut env = HashMap::new();

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("pipeline name".to_string()))?;
            }
            "on" => {
                triggers.push(parse_trigger(node)?);
            }
            "job" => {
                let (job, likes) = parse_job(node)?;
                pending_likes.extend(likes.into_iter().map(|l| (jobs.len(), l)));
                jobs.push(job);
            }
            "env" => {
                env.extend(parse_env_block(node));
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("pipeline name".to_string()));
    }

    let mut seen = HashSet::new();
    for job in &jobs {
        if !seen.insert(job.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("job '{}'", job.name)));
        }
    }

    // Resolve `verify like="<job>"` now that every job is known
    for (job_idx, like) in pending_likes {
        let command = jobs
            .iter()
            .find(|j| j.name == like.target)
            .ok_or_else(|| {
                ConfigError::InvalidReference(format!(
                    "job '{}' verifies like unknown job '{}'",
                    jobs[job_idx].name, like.target
                ))
            })?
            .primary_build_command()
            .cloned()
            .ok_or_else(|| {
                ConfigError::InvalidReference(format!(
                    "job '{}' has no build command to verify with",
                    like.target
                ))
            })?;

        if let Action::Verify(spec) = &mut jobs[job_idx].steps[like.step].action {
            spec.command = command;
        }
    }

    Ok(Pipeline {
        id: ResourceId::new(),
        name,
        triggers,
        jobs,
        env,
    })
}

/// A `verify like="..."` waiting for the referenced job to be parsed.
struct PendingLike {
    step: usize,
    target: String,
}

fn parse_trigger(node: &KdlNode) -> ConfigResult<Trigger> {
    let trigger_type = get_first_string_arg(node).unwrap_or_default();

    let kind = match trigger_type.as_str() {
        "push" => EventKind::Push,
        "pull_request" | "pull-request" => EventKind::PullRequest,
        _ => {
            return Err(ConfigError::InvalidValue {
                field: "trigger type".to_string(),
                message: format!("unknown trigger type: {}", trigger_type),
            });
        }
    };

    let mut trigger = Trigger::new(kind);
    trigger.branches = compile_patterns(get_string_list_prop(node, "branches"))?;
    trigger.tags = compile_patterns(get_string_list_prop(node, "tags"))?;
    trigger.paths_ignore = compile_patterns(get_string_list_prop(node, "paths-ignore"))?;

    if kind == EventKind::PullRequest && !trigger.tags.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "tags".to_string(),
            message: "pull_request triggers cannot filter on tags".to_string(),
        });
    }

    Ok(trigger)
}

fn parse_job(node: &KdlNode) -> ConfigResult<(Job, Vec<PendingLike>)> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("job name".to_string()))?;

    let role = match get_string_prop(node, "role").as_deref() {
        None | Some("build") => JobRole::Build,
        Some("maintenance") => JobRole::Maintenance,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: format!("role of job '{}'", name),
                message: format!("unknown role: {}", other),
            });
        }
    };

    let mut environment = JobEnvironment::default();
    let mut predicate = JobPredicate::default();
    let mut steps = Vec::new();
    let mut likes = Vec::new();
    let mut env = HashMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let step_name = get_string_prop(child, "name");
            let timeout = get_timeout(child)?;
            let action = match child.name().value() {
                "toolchain" => {
                    if environment.toolchain.is_some() {
                        return Err(ConfigError::Duplicate(format!(
                            "toolchain in job '{}'",
                            name
                        )));
                    }
                    environment.toolchain = Some(get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::MissingField(format!("toolchain for job '{}'", name))
                    })?);
                    environment.target = get_string_prop(child, "target");
                    continue;
                }
                "only-ref" => {
                    predicate
                        .only_refs
                        .extend(compile_patterns(get_all_string_args(child))?);
                    continue;
                }
                "unless-ref" => {
                    predicate
                        .unless_refs
                        .extend(compile_patterns(get_all_string_args(child))?);
                    continue;
                }
                "env" => {
                    env.extend(parse_env_block(child));
                    continue;
                }
                "build" => Action::Build(parse_command(child, &name, "build")?),
                "fetch" => Action::Fetch(parse_fetch(child, &name)?),
                "regenerate" => Action::Regenerate(parse_regenerate(child, &name, &steps)?),
                "verify" => {
                    let drift = match get_string_prop(child, "drift") {
                        Some(policy) => policy.parse::<DriftPolicy>().map_err(|message| {
                            ConfigError::InvalidValue {
                                field: format!("drift in job '{}'", name),
                                message,
                            }
                        })?,
                        None => DriftPolicy::Off,
                    };
                    let command = match get_string_prop(child, "like") {
                        Some(target) => {
                            likes.push(PendingLike {
                                step: steps.len(),
                                target,
                            });
                            // Filled in once every job is parsed
                            CommandLine::new("", Vec::<String>::new())
                        }
                        None => parse_command(child, &name, "verify")?,
                    };
                    Action::Verify(VerifySpec { command, drift })
                }
                "cancel-stale" => {
                    let defaults = CancelSpec::default();
                    Action::CancelStaleRuns(CancelSpec {
                        token_env: get_string_prop(child, "token-env")
                            .unwrap_or(defaults.token_env),
                        repository: get_string_prop(child, "repository"),
                        api_url: get_string_prop(child, "api-url").unwrap_or(defaults.api_url),
                    })
                }
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("job '{}'", name),
                        message: format!("unknown step '{}'", other),
                    });
                }
            };

            let step_name = step_name.unwrap_or_else(|| default_step_name(&action));
            steps.push(Step {
                name: step_name,
                action,
                timeout,
            });
        }
    }

    // Provisioning always comes first
    if let Some(toolchain) = &environment.toolchain {
        let mut spec = ToolchainSpec::new(toolchain.clone());
        spec.target = environment.target.clone();
        let action = Action::Provision(spec);
        steps.insert(
            0,
            Step {
                name: default_step_name(&action),
                action,
                timeout: None,
            },
        );
        for like in &mut likes {
            like.step += 1;
        }
    }

    let job = Job {
        name,
        role,
        environment,
        predicate,
        steps,
        env,
    };
    validate_job(&job)?;
    Ok((job, likes))
}

fn validate_job(job: &Job) -> ConfigResult<()> {
    let work_steps = job
        .steps
        .iter()
        .filter(|s| !matches!(s.action, Action::Provision(_)))
        .count();
    if work_steps == 0 {
        return Err(ConfigError::MissingField(format!(
            "steps for job '{}'",
            job.name
        )));
    }

    let mut seen = HashSet::new();
    for (idx, step) in job.steps.iter().enumerate() {
        if !seen.insert(step.name.as_str()) {
            return Err(ConfigError::Duplicate(format!(
                "step '{}' in job '{}'",
                step.name, job.name
            )));
        }

        match &step.action {
            Action::Verify(_) => {
                let follows_regenerate = idx > 0
                    && matches!(job.steps[idx - 1].action, Action::Regenerate(_));
                if !follows_regenerate {
                    return Err(ConfigError::StepOrder(format!(
                        "verify in job '{}' must directly follow a regenerate step",
                        job.name
                    )));
                }
            }
            Action::CancelStaleRuns(_) if !job.is_maintenance() => {
                return Err(ConfigError::InvalidValue {
                    field: format!("job '{}'", job.name),
                    message: "cancel-stale requires role=\"maintenance\"".to_string(),
                });
            }
            Action::Regenerate(_) | Action::Fetch(_) if job.is_maintenance() => {
                return Err(ConfigError::InvalidValue {
                    field: format!("job '{}'", job.name),
                    message: "maintenance jobs cannot regenerate sources".to_string(),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

fn parse_command(node: &KdlNode, job: &str, what: &str) -> ConfigResult<CommandLine> {
    let mut args = get_all_string_args(node).into_iter();
    let program = args
        .next()
        .ok_or_else(|| ConfigError::MissingField(format!("{} command in job '{}'", what, job)))?;
    Ok(CommandLine::new(program, args))
}

fn parse_fetch(node: &KdlNode, job: &str) -> ConfigResult<FetchSpec> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("fetch tool name in job '{}'", job)))?;
    let version = get_string_prop(node, "version").ok_or_else(|| {
        ConfigError::MissingField(format!("version of '{}' in job '{}'", name, job))
    })?;
    let version = version.trim_start_matches('v').to_string();
    let artifact = get_string_prop(node, "artifact").unwrap_or_else(|| name.clone());

    Ok(FetchSpec {
        version,
        base_url: get_string_prop(node, "base").unwrap_or_else(|| DEFAULT_RELEASE_BASE.to_string()),
        platform: get_string_prop(node, "platform").unwrap_or_else(host_platform),
        binary: get_string_prop(node, "binary").unwrap_or_else(|| format!("bin/{}", artifact)),
        env_var: get_string_prop(node, "env")
            .unwrap_or_else(|| name.to_uppercase().replace('-', "_")),
        artifact,
        name,
    })
}

fn parse_regenerate(node: &KdlNode, job: &str, earlier: &[Step]) -> ConfigResult<RegenerateSpec> {
    let fetched: Vec<&str> = earlier
        .iter()
        .filter_map(|s| match &s.action {
            Action::Fetch(spec) => Some(spec.name.as_str()),
            _ => None,
        })
        .collect();

    let tool = match get_string_prop(node, "tool") {
        Some(tool) => tool,
        None => fetched.last().map(|t| t.to_string()).ok_or_else(|| {
            ConfigError::StepOrder(format!(
                "regenerate in job '{}' needs an earlier fetch step",
                job
            ))
        })?,
    };
    if !fetched.contains(&tool.as_str()) {
        return Err(ConfigError::InvalidReference(format!(
            "regenerate in job '{}' uses tool '{}' which no earlier step fetches",
            job, tool
        )));
    }

    let schema_root = get_string_prop(node, "schema")
        .ok_or_else(|| ConfigError::MissingField(format!("schema root in job '{}'", job)))?;
    let output_root = get_string_prop(node, "output")
        .ok_or_else(|| ConfigError::MissingField(format!("output root in job '{}'", job)))?;

    for (field, path) in [("schema", &schema_root), ("output", &output_root)] {
        if Path::new(path).is_absolute() || path.split('/').any(|c| c == "..") {
            return Err(ConfigError::InvalidValue {
                field: format!("{} in job '{}'", field, job),
                message: format!("'{}' must be repository-relative", path),
            });
        }
    }

    Ok(RegenerateSpec {
        tool,
        schema_root: PathBuf::from(schema_root),
        output_root: PathBuf::from(output_root),
        command: parse_command(node, job, "regenerate")?,
    })
}

fn default_step_name(action: &Action) -> String {
    match action {
        Action::Provision(spec) => match &spec.target {
            Some(target) => format!("provision {} ({})", spec.toolchain, target),
            None => format!("provision {}", spec.toolchain),
        },
        Action::Fetch(spec) => format!("fetch {} {}", spec.name, spec.version),
        Action::Regenerate(spec) => format!("regenerate {}", spec.output_root.display()),
        Action::Build(cmd) => cmd.to_string(),
        Action::Verify(_) => "verify".to_string(),
        Action::CancelStaleRuns(_) => "cancel stale runs".to_string(),
    }
}

fn parse_env_block(node: &KdlNode) -> HashMap<String, String> {
    let mut env = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            if let Some(val) = get_first_string_arg(child) {
                env.insert(key, val);
            }
        }
    }
    env
}

fn compile_patterns(raw: Vec<String>) -> ConfigResult<Vec<FilterPattern>> {
    raw.into_iter()
        .map(|p| FilterPattern::new(p).map_err(|e| ConfigError::InvalidPattern(e.to_string())))
        .collect()
}

fn get_timeout(node: &KdlNode) -> ConfigResult<Option<Duration>> {
    match node.get("timeout-secs") {
        None => Ok(None),
        Some(value) => {
            let secs = value
                .as_integer()
                .filter(|s| *s > 0)
                .and_then(|s| u64::try_from(s).ok())
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "timeout-secs".to_string(),
                    message: format!("expected a positive integer, got {}", value),
                })?;
            Ok(Some(Duration::from_secs(secs)))
        }
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let mut result = Vec::new();

    // Repeated attributes like branches="main" branches="develop"
    for entry in node.entries() {
        if let Some(entry_name) = entry.name() {
            if entry_name.value() == name {
                if let Some(s) = entry.value().as_string() {
                    result.push(s.to_string());
                }
            }
        }
    }

    // Block syntax: a child node named after the property
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == name {
                result.extend(get_all_string_args(child));
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        pipeline "ci"

        on "push" {
            branches "main"
            tags "v[0-9]+.[0-9]+.[0-9]+"
            paths-ignore "docs/**" "**.md"
        }

        on "pull_request" {
            paths-ignore "docs/**" "**.md"
        }

        job "cleanup-runs" role="maintenance" {
            unless-ref "main" "v[0-9]+.[0-9]+.[0-9]+"
            cancel-stale token-env="GITHUB_TOKEN"
        }

        job "build" {
            toolchain "stable"
            build "cargo" "build-all"
        }

        job "build-wasm" {
            toolchain "stable" target="wasm32-unknown-unknown"
            build "cargo" "build-wasm-tendermint"
            build "cargo" "build-wasm-light-client"
        }

        job "protobuf" {
            toolchain "stable"
            fetch "protoc" version="3.19.4" platform="linux-x86_64"
            regenerate "cargo" "run" "-p" "proto-compiler" schema="proto" output="proto/src/prost"
            verify like="build" drift="warn"
        }
    "#;

    #[test]
    fn test_parse_full_pipeline() {
        let pipeline = parse_pipeline(FULL).unwrap();
        assert_eq!(pipeline.name, "ci");
        assert_eq!(pipeline.triggers.len(), 2);
        assert_eq!(pipeline.jobs.len(), 4);

        let push = &pipeline.triggers[0];
        assert_eq!(push.kind, EventKind::Push);
        assert_eq!(push.branches.len(), 1);
        assert_eq!(push.tags[0].as_str(), "v[0-9]+.[0-9]+.[0-9]+");
        assert_eq!(push.paths_ignore.len(), 2);
    }

    #[test]
    fn test_maintenance_job() {
        let pipeline = parse_pipeline(FULL).unwrap();
        let cleanup = pipeline.job("cleanup-runs").unwrap();
        assert!(cleanup.is_maintenance());
        assert_eq!(cleanup.predicate.unless_refs.len(), 2);
        assert!(cleanup.environment.toolchain.is_none());
        assert!(matches!(
            cleanup.steps[0].action,
            Action::CancelStaleRuns(ref spec) if spec.token_env == "GITHUB_TOKEN"
        ));
    }

    #[test]
    fn test_provision_step_inserted_first() {
        let pipeline = parse_pipeline(FULL).unwrap();
        let wasm = pipeline.job("build-wasm").unwrap();
        assert_eq!(wasm.steps.len(), 3);
        match &wasm.steps[0].action {
            Action::Provision(spec) => {
                assert_eq!(spec.toolchain, "stable");
                assert_eq!(spec.target.as_deref(), Some("wasm32-unknown-unknown"));
            }
            other => panic!("expected provision, got {:?}", other),
        }
        assert_eq!(wasm.steps[1].name, "cargo build-wasm-tendermint");
    }

    #[test]
    fn test_regeneration_job() {
        let pipeline = parse_pipeline(FULL).unwrap();
        let job = pipeline.job("protobuf").unwrap();
        let kinds: Vec<_> = job.steps.iter().map(|s| s.action.kind()).collect();
        assert_eq!(kinds, vec!["provision", "fetch", "regenerate", "verify"]);

        match &job.steps[1].action {
            Action::Fetch(spec) => {
                assert_eq!(spec.env_var, "PROTOC");
                assert_eq!(spec.binary, "bin/protoc");
                assert!(spec.url().ends_with("/v3.19.4/protoc-3.19.4-linux-x86_64.zip"));
            }
            other => panic!("expected fetch, got {:?}", other),
        }

        match &job.steps[2].action {
            Action::Regenerate(spec) => {
                assert_eq!(spec.tool, "protoc");
                assert_eq!(spec.schema_root, PathBuf::from("proto"));
                assert_eq!(spec.command.to_string(), "cargo run -p proto-compiler");
            }
            other => panic!("expected regenerate, got {:?}", other),
        }

        // verify reuses the native build command
        match &job.steps[3].action {
            Action::Verify(spec) => {
                assert_eq!(spec.command, CommandLine::new("cargo", ["build-all"]));
                assert_eq!(spec.drift, DriftPolicy::Warn);
            }
            other => panic!("expected verify, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_must_follow_regenerate() {
        let kdl = r#"
            pipeline "bad-order"

            job "protobuf" {
                fetch "protoc" version="3.19.4"
                regenerate "make" "proto" schema="proto" output="gen"
                build "cargo" "fmt"
                verify "cargo" "build-all"
            }
        "#;

        let result = parse_pipeline(kdl);
        assert!(matches!(result.unwrap_err(), ConfigError::StepOrder(_)));
    }

    #[test]
    fn test_regenerate_needs_fetch() {
        let kdl = r#"
            pipeline "no-fetch"

            job "protobuf" {
                regenerate "make" "proto" schema="proto" output="gen"
            }
        "#;

        assert!(matches!(
            parse_pipeline(kdl).unwrap_err(),
            ConfigError::StepOrder(_)
        ));

        let kdl = r#"
            pipeline "wrong-tool"

            job "protobuf" {
                fetch "protoc" version="3.19.4"
                regenerate "make" "proto" tool="buf" schema="proto" output="gen"
            }
        "#;

        assert!(matches!(
            parse_pipeline(kdl).unwrap_err(),
            ConfigError::InvalidReference(_)
        ));
    }

    #[test]
    fn test_verify_like_unknown_job() {
        let kdl = r#"
            pipeline "bad-like"

            job "protobuf" {
                fetch "protoc" version="3.19.4"
                regenerate "make" schema="proto" output="gen"
                verify like="nonexistent"
            }
        "#;

        assert!(matches!(
            parse_pipeline(kdl).unwrap_err(),
            ConfigError::InvalidReference(_)
        ));
    }

    #[test]
    fn test_unknown_step_rejected() {
        let kdl = r#"
            pipeline "typo"

            job "build" {
                build "cargo" "build-all"
            }

            job "protobuf" {
                fetch "protoc" version="3.19.4"
                regenerate "make" tool="protoc" schema="proto" output="gen"
                verfy like="build"
            }
        "#;

        match parse_pipeline(kdl).unwrap_err() {
            ConfigError::InvalidValue { field, message } => {
                assert_eq!(field, "job 'protobuf'");
                assert!(message.contains("verfy"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_jobs() {
        let kdl = r#"
            pipeline "dupes"

            job "build" {
                build "cargo" "build"
            }

            job "build" {
                build "cargo" "build" "--release"
            }
        "#;

        assert!(matches!(
            parse_pipeline(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    #[test]
    fn test_missing_pipeline_name() {
        let kdl = r#"
            job "build" {
                build "cargo" "build"
            }
        "#;
        assert!(matches!(
            parse_pipeline(kdl).unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }

    #[test]
    fn test_cancel_stale_requires_maintenance_role() {
        let kdl = r#"
            pipeline "misplaced"

            job "build" {
                cancel-stale
            }
        "#;
        assert!(matches!(
            parse_pipeline(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_step_timeout_and_env() {
        let kdl = r#"
            pipeline "timeouts"

            env {
                CARGO_TERM_COLOR "always"
            }

            job "build" {
                env {
                    RUSTFLAGS "-D warnings"
                }
                build "cargo" "build-all" timeout-secs=1800
            }
        "#;

        let pipeline = parse_pipeline(kdl).unwrap();
        assert_eq!(
            pipeline.env.get("CARGO_TERM_COLOR"),
            Some(&"always".to_string())
        );
        let job = pipeline.job("build").unwrap();
        assert_eq!(job.env.get("RUSTFLAGS"), Some(&"-D warnings".to_string()));
        assert_eq!(job.steps[0].timeout, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_invalid_trigger_pattern() {
        let kdl = r#"
            pipeline "bad-pattern"

            on "push" {
                tags "v[0-9"
            }

            job "build" {
                build "cargo" "build"
            }
        "#;
        assert!(matches!(
            parse_pipeline(kdl).unwrap_err(),
            ConfigError::InvalidPattern(_)
        ));
    }

    #[test]
    fn test_paths_must_be_relative() {
        let kdl = r#"
            pipeline "escape"

            job "protobuf" {
                fetch "protoc" version="3.19.4"
                regenerate "make" schema="../proto" output="gen"
            }
        "#;
        assert!(matches!(
            parse_pipeline(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_shipped_pipeline() {
        let pipeline = parse_pipeline(include_str!("../../../driftgate.kdl")).unwrap();
        assert_eq!(pipeline.jobs.len(), 5);
        assert_eq!(
            pipeline.env.get("CARGO_TERM_COLOR"),
            Some(&"always".to_string())
        );

        let protobuf = pipeline.job("protobuf").unwrap();
        match &protobuf.steps[3].action {
            Action::Verify(spec) => {
                assert_eq!(spec.command, CommandLine::new("cargo", ["build-all"]))
            }
            other => panic!("expected verify, got {:?}", other),
        }
        assert_eq!(protobuf.steps[1].timeout, Some(Duration::from_secs(300)));
    }
}
