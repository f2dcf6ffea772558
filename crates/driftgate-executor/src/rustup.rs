//! Rust toolchain provisioning via rustup.

use async_trait::async_trait;
use driftgate_core::toolchain::{ProvisionedToolchain, ToolchainProvisioner, ToolchainSpec};
use driftgate_core::{Error, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Installs toolchains and targets with `rustup`.
///
/// Already installed toolchains and targets are left alone, so repeated
/// provisioning on a warm machine costs two `rustup` queries.
pub struct RustupProvisioner {
    program: String,
    profile: String,
}

impl Default for RustupProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl RustupProvisioner {
    pub fn new() -> Self {
        Self {
            program: "rustup".to_string(),
            profile: "minimal".to_string(),
        }
    }

    /// Use a different rustup binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn rustup(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Provision(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provision(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn is_toolchain_installed(&self, toolchain: &str) -> Result<bool> {
        let listing = self.rustup(&["toolchain", "list"]).await?;
        Ok(listing.lines().any(|line| toolchain_matches(line, toolchain)))
    }

    async fn is_target_installed(&self, toolchain: &str, target: &str) -> Result<bool> {
        let listing = self
            .rustup(&["target", "list", "--installed", "--toolchain", toolchain])
            .await?;
        Ok(listing.lines().any(|line| line.trim() == target))
    }
}

/// `rustup toolchain list` prints entries like `stable-x86_64-unknown-linux-gnu (default)`.
fn toolchain_matches(line: &str, toolchain: &str) -> bool {
    let name = line.split_whitespace().next().unwrap_or_default();
    name == toolchain
        || name
            .strip_prefix(toolchain)
            .is_some_and(|rest| rest.starts_with('-') && rest.len() > 1)
}

#[async_trait]
impl ToolchainProvisioner for RustupProvisioner {
    fn name(&self) -> &'static str {
        "rustup"
    }

    async fn provision(&self, spec: &ToolchainSpec) -> Result<ProvisionedToolchain> {
        self.rustup(&["--version"]).await.map_err(|e| {
            Error::Provision(format!(
                "rustup is not available (https://rustup.rs): {}",
                e
            ))
        })?;

        if self.is_toolchain_installed(&spec.toolchain).await? {
            debug!(toolchain = %spec.toolchain, "Toolchain already installed");
        } else {
            info!(toolchain = %spec.toolchain, profile = %self.profile, "Installing Rust toolchain");
            self.rustup(&[
                "toolchain",
                "install",
                &spec.toolchain,
                "--profile",
                &self.profile,
            ])
            .await?;
        }

        if let Some(target) = &spec.target {
            if self.is_target_installed(&spec.toolchain, target).await? {
                debug!(%target, "Target already installed");
            } else {
                info!(toolchain = %spec.toolchain, %target, "Adding compilation target");
                self.rustup(&["target", "add", "--toolchain", &spec.toolchain, target])
                    .await?;
            }
        }

        Ok(ProvisionedToolchain {
            toolchain: spec.toolchain.clone(),
            target: spec.target.clone(),
        })
    }
}
