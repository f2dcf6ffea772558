//! Fetching versioned external tools (the schema compiler).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Result;

/// Where and what to download.
///
/// The archive URL follows `{base}/v{version}/{artifact}-{version}-{platform}.zip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSpec {
    /// Name the tool is bound under for later steps.
    pub name: String,
    pub version: String,
    pub base_url: String,
    pub artifact: String,
    pub platform: String,
    /// Path of the executable inside the archive.
    pub binary: String,
    /// Variable through which child processes learn the tool location.
    pub env_var: String,
}

impl FetchSpec {
    pub fn url(&self) -> String {
        format!(
            "{}/v{}/{}-{}-{}.zip",
            self.base_url.trim_end_matches('/'),
            self.version,
            self.artifact,
            self.version,
            self.platform
        )
    }

    /// Directory name the archive is unpacked into.
    pub fn install_dir_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Platform suffix used by protobuf release archives for the current host.
pub fn host_platform() -> String {
    let os = match std::env::consts::OS {
        "macos" => "osx",
        "windows" => "win64",
        other => other,
    };
    if os == "win64" {
        return os.to_string();
    }
    let arch = match std::env::consts::ARCH {
        "aarch64" => "aarch_64",
        "x86" => "x86_32",
        other => other,
    };
    format!("{}-{}", os, arch)
}

/// A tool unpacked on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedTool {
    pub name: String,
    pub version: String,
    /// Absolute path of the executable.
    pub path: PathBuf,
    pub env_var: String,
}

impl FetchedTool {
    /// Directory containing the executable, for `PATH`.
    pub fn bin_dir(&self) -> Option<&Path> {
        self.path.parent()
    }
}

/// Downloads and unpacks tools.
#[async_trait]
pub trait ToolFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch `spec` and unpack it below `dest`.
    async fn fetch(&self, spec: &FetchSpec, dest: &Path) -> Result<FetchedTool>;
}
