//! Toolchain provisioning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A compiler toolchain plus an optional secondary target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainSpec {
    /// Toolchain name or version ("stable", "1.83.0", ...).
    pub toolchain: String,
    /// Extra compilation target (e.g. `wasm32-unknown-unknown`).
    pub target: Option<String>,
}

impl ToolchainSpec {
    pub fn new(toolchain: impl Into<String>) -> Self {
        Self {
            toolchain: toolchain.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// A toolchain that is ready to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedToolchain {
    pub toolchain: String,
    pub target: Option<String>,
}

/// Installs toolchains. Network-dependent and fallible; a failure aborts
/// only the job that asked for the toolchain.
#[async_trait]
pub trait ToolchainProvisioner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn provision(&self, spec: &ToolchainSpec) -> Result<ProvisionedToolchain>;
}
