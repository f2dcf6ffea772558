//! Variable interpolation for step commands and environment values.
//!
//! Supports variables like:
//! - `${event.kind}` - `push` or `pull_request`
//! - `${event.ref}` - Ref as carried by the event (`refs/tags/v1.2.3`)
//! - `${event.ref_name}` - Ref without its `refs/...` prefix
//! - `${pipeline.name}` - Pipeline name
//! - `${run.id}` - Run ID
//! - `${job.name}` - Current job name
//! - `${step.name}` - Current step name
//! - `${step.index}` - Index of the current step within its job
//! - `${toolchain}` - Toolchain provisioned for the job
//! - `${target}` - Secondary compilation target, if any
//! - `${tools.NAME}` - Path of a tool fetched earlier in the job
//! - `${schema}` - Schema root of the running regenerate step
//! - `${output}` - Output root of the running regenerate step
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)

use driftgate_core::bindings::JobBindings;
use driftgate_core::event::TriggerEvent;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub event: EventContext,
    pub job: JobContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Fetched tool paths by tool name
    pub tools: HashMap<String, String>,
    /// Custom variables defined by user
    pub custom: HashMap<String, String>,
}

/// Event and run context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub kind: String,
    pub git_ref: String,
    pub ref_name: String,
    pub pipeline: String,
    pub run_id: String,
}

/// Job and step context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub name: String,
    pub step: String,
    pub step_index: usize,
    pub toolchain: Option<String>,
    pub target: Option<String>,
    /// Set only while a regenerate step runs
    pub schema: Option<String>,
    pub output: Option<String>,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_-]*)?)\}")
        .expect("variable regex is valid")
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for one run of a pipeline triggered by `event`.
    pub fn for_event(event: &TriggerEvent, pipeline: &str, run_id: &str) -> Self {
        let mut ctx = Self::new();
        ctx.event = EventContext {
            kind: event.kind.to_string(),
            git_ref: event.git_ref.clone(),
            ref_name: event.ref_name().short_name().to_string(),
            pipeline: pipeline.to_string(),
            run_id: run_id.to_string(),
        };
        ctx
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Refresh toolchain and tool variables from a job's bindings.
    pub fn bind(&mut self, bindings: &JobBindings) {
        if let Some(toolchain) = &bindings.toolchain {
            self.job.toolchain = Some(toolchain.toolchain.clone());
            self.job.target = toolchain.target.clone();
        }
        for (name, tool) in &bindings.tools {
            self.tools
                .insert(name.clone(), tool.path.to_string_lossy().to_string());
        }
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["event", "kind"] => Some(self.event.kind.clone()),
            ["event", "ref"] => Some(self.event.git_ref.clone()),
            ["event", "ref_name"] => Some(self.event.ref_name.clone()),

            ["pipeline", "name"] => Some(self.event.pipeline.clone()),
            ["run", "id"] => Some(self.event.run_id.clone()),

            ["job", "name"] => Some(self.job.name.clone()),
            ["step", "name"] => Some(self.job.step.clone()),
            ["step", "index"] => Some(self.job.step_index.to_string()),

            ["toolchain"] => self.job.toolchain.clone(),
            ["target"] => self.job.target.clone(),
            ["schema"] => self.job.schema.clone(),
            ["output"] => self.job.output.clone(),

            ["tools", name] => self.tools.get(*name).cloned(),
            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),

            // Single-part names check custom variables
            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string. Unknown variables are left as is.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    /// Variable names referenced in `input` that cannot be resolved.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .filter_map(|caps| {
                let var_name = &caps[1];
                if self.resolve(var_name).is_none() {
                    Some(var_name.to_string())
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_event(mut self, event: &TriggerEvent) -> Self {
        self.ctx.event.kind = event.kind.to_string();
        self.ctx.event.git_ref = event.git_ref.clone();
        self.ctx.event.ref_name = event.ref_name().short_name().to_string();
        self
    }

    pub fn with_pipeline(mut self, name: impl Into<String>) -> Self {
        self.ctx.event.pipeline = name.into();
        self
    }

    pub fn with_run(mut self, id: impl Into<String>) -> Self {
        self.ctx.event.run_id = id.into();
        self
    }

    pub fn with_job(mut self, name: impl Into<String>) -> Self {
        self.ctx.job.name = name.into();
        self
    }

    pub fn with_step(mut self, name: impl Into<String>, index: usize) -> Self {
        self.ctx.job.step = name.into();
        self.ctx.job.step_index = index;
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.ctx.tools.insert(name.into(), path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftgate_core::tool::FetchedTool;
    use driftgate_core::toolchain::ProvisionedToolchain;
    use std::path::PathBuf;

    #[test]
    fn test_event_variables() {
        let event = TriggerEvent::push("refs/tags/v1.2.3");
        let ctx = VariableContext::for_event(&event, "ci", "run-1");

        let result = ctx.interpolate("${event.kind} of ${event.ref_name} (${event.ref})");
        assert_eq!(result, "push of v1.2.3 (refs/tags/v1.2.3)");
        assert_eq!(ctx.interpolate("${pipeline.name}/${run.id}"), "ci/run-1");
    }

    #[test]
    fn test_job_and_step_variables() {
        let ctx = VariableContextBuilder::new()
            .with_job("build-wasm")
            .with_step("cargo build-wasm-tendermint", 2)
            .build();

        let result = ctx.interpolate("${job.name}#${step.index}: ${step.name}");
        assert_eq!(result, "build-wasm#2: cargo build-wasm-tendermint");
    }

    #[test]
    fn test_bindings_expose_tools_and_toolchain() {
        let mut bindings = JobBindings::new();
        bindings.toolchain = Some(ProvisionedToolchain {
            toolchain: "stable".to_string(),
            target: Some("wasm32-unknown-unknown".to_string()),
        });
        bindings.tools.insert(
            "protoc".to_string(),
            FetchedTool {
                name: "protoc".to_string(),
                version: "3.19.4".to_string(),
                path: PathBuf::from("/work/.driftgate/tools/protoc-3.19.4/bin/protoc"),
                env_var: "PROTOC".to_string(),
            },
        );

        let mut ctx = VariableContext::new();
        ctx.bind(&bindings);

        assert_eq!(
            ctx.interpolate("${tools.protoc} --version"),
            "/work/.driftgate/tools/protoc-3.19.4/bin/protoc --version"
        );
        assert_eq!(
            ctx.interpolate("+${toolchain} --target ${target}"),
            "+stable --target wasm32-unknown-unknown"
        );
    }

    #[test]
    fn test_regeneration_roots() {
        let mut ctx = VariableContext::new();
        assert_eq!(ctx.interpolate("-I ${schema}"), "-I ${schema}");

        ctx.job.schema = Some("/work/proto/definitions".to_string());
        ctx.job.output = Some("/work/proto/src/prost".to_string());
        assert_eq!(
            ctx.interpolate("-I ${schema} --out ${output}"),
            "-I /work/proto/definitions --out /work/proto/src/prost"
        );
    }

    #[test]
    fn test_env_variables() {
        let ctx = VariableContextBuilder::new()
            .with_env("MY_VAR", "hello")
            .with_env("ANOTHER", "world")
            .build();

        let result = ctx.interpolate("${env.MY_VAR} ${env.ANOTHER}!");
        assert_eq!(result, "hello world!");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::new();
        let result = ctx.interpolate("Unknown: ${unknown.var}");
        assert_eq!(result, "Unknown: ${unknown.var}");
        assert_eq!(ctx.unresolved("${unknown.var} ${date}"), vec!["unknown.var"]);
    }

    #[test]
    fn test_toolchain_unset_is_unresolved() {
        let ctx = VariableContext::new();
        assert_eq!(ctx.interpolate("${toolchain}"), "${toolchain}");
    }

    #[test]
    fn test_interpolate_map() {
        let ctx = VariableContextBuilder::new()
            .with_tool("protoc", "/opt/protoc")
            .build();

        let mut env = HashMap::new();
        env.insert("PROTOC".to_string(), "${tools.protoc}".to_string());
        let result = ctx.interpolate_map(&env);
        assert_eq!(result.get("PROTOC"), Some(&"/opt/protoc".to_string()));
    }

    #[test]
    fn test_custom_variables() {
        let mut ctx = VariableContext::new();
        ctx.set("component", "light-client");

        let result = ctx.interpolate("build-wasm-${component}");
        assert_eq!(result, "build-wasm-light-client");
    }

    #[test]
    fn test_date_variable() {
        let ctx = VariableContext::new();
        let result = ctx.interpolate("${date}");
        assert_eq!(result.len(), 10);
        assert!(result.contains('-'));
    }

    #[test]
    fn test_nested_braces() {
        let ctx = VariableContextBuilder::new().with_custom("sha", "abc123").build();

        let result = ctx.interpolate(r#"{"sha": "${sha}"}"#);
        assert_eq!(result, r#"{"sha": "abc123"}"#);
    }
}
