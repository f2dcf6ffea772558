//! Typed step results threaded through a job.
//!
//! A step's output is folded into the job's [`JobBindings`] and is visible to
//! every later step of the same job. Bindings never cross job boundaries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::maintenance::CancelReport;
use crate::tool::FetchedTool;
use crate::toolchain::ProvisionedToolchain;
use crate::{Error, Result};

/// Outcome of one regeneration pass over the generated tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationReport {
    /// Generated root, relative to the checkout.
    pub output_root: PathBuf,
    /// Files in the generated tree after regeneration.
    pub files: usize,
    /// Digest of the whole generated tree after regeneration.
    pub digest: String,
    /// Files added, removed or modified compared to the committed baseline.
    pub changed: Vec<PathBuf>,
}

impl RegenerationReport {
    pub fn has_drift(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Output of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutput {
    None,
    Toolchain(ProvisionedToolchain),
    Tool(FetchedTool),
    Regenerated(RegenerationReport),
    Cancelled(CancelReport),
}

/// Job-local bindings accumulated from step outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBindings {
    pub toolchain: Option<ProvisionedToolchain>,
    pub tools: BTreeMap<String, FetchedTool>,
    pub regeneration: Option<RegenerationReport>,
}

impl JobBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, output: StepOutput) {
        match output {
            StepOutput::None | StepOutput::Cancelled(_) => {}
            StepOutput::Toolchain(toolchain) => self.toolchain = Some(toolchain),
            StepOutput::Tool(tool) => {
                self.tools.insert(tool.name.clone(), tool);
            }
            StepOutput::Regenerated(report) => self.regeneration = Some(report),
        }
    }

    pub fn tool(&self, name: &str) -> Result<&FetchedTool> {
        self.tools
            .get(name)
            .ok_or_else(|| Error::MissingBinding(format!("tool '{}' was not fetched", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_tool_binding() {
        let mut bindings = JobBindings::new();
        assert!(matches!(
            bindings.tool("protoc"),
            Err(Error::MissingBinding(_))
        ));

        bindings.apply(StepOutput::Tool(FetchedTool {
            name: "protoc".to_string(),
            version: "3.19.4".to_string(),
            path: PathBuf::from("/opt/protoc/bin/protoc"),
            env_var: "PROTOC".to_string(),
        }));

        let tool = bindings.tool("protoc").unwrap();
        assert_eq!(tool.env_var, "PROTOC");
    }

    #[test]
    fn test_regeneration_report_drift() {
        let mut report = RegenerationReport::default();
        assert!(!report.has_drift());
        report.changed.push(PathBuf::from("tendermint.types.rs"));
        assert!(report.has_drift());
    }
}
