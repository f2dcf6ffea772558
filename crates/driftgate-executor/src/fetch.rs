//! Release-archive tool fetching.

use async_trait::async_trait;
use driftgate_core::tool::{FetchSpec, FetchedTool, ToolFetcher};
use driftgate_core::{Error, Result};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Downloads a zip release archive and unpacks it under the destination
/// directory. Archives are cached: a tool whose binary is already unpacked
/// is not downloaded again.
pub struct HttpToolFetcher {
    client: reqwest::Client,
}

impl Default for HttpToolFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpToolFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("driftgate")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!(%url, "Downloading release archive");

        // Local mirrors and tests
        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read(path)
                .await
                .map_err(|e| Error::Fetch(format!("failed to read {}: {}", path, e)));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("failed to download {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "failed to download {} (HTTP {})",
                url,
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Fetch(format!("failed to read {}: {}", url, e)))
    }
}

#[async_trait]
impl ToolFetcher for HttpToolFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, spec: &FetchSpec, dest: &Path) -> Result<FetchedTool> {
        let install_dir = dest.join(spec.install_dir_name());
        let binary = install_dir.join(&spec.binary);

        if tokio::fs::try_exists(&binary).await.unwrap_or(false) {
            debug!(tool = %spec.name, path = %binary.display(), "Using cached tool");
            return Ok(fetched(spec, binary));
        }

        let url = spec.url();
        info!(tool = %spec.name, version = %spec.version, %url, "Fetching tool");
        let data = self.download(&url).await?;

        let target = install_dir.clone();
        tokio::task::spawn_blocking(move || extract_zip(&data, &target))
            .await
            .map_err(|e| Error::Internal(format!("extraction task failed: {}", e)))??;

        if !binary.is_file() {
            return Err(Error::Fetch(format!(
                "archive {} does not contain {}",
                url, spec.binary
            )));
        }
        make_executable(&binary)?;

        Ok(fetched(spec, binary))
    }
}

fn fetched(spec: &FetchSpec, path: PathBuf) -> FetchedTool {
    FetchedTool {
        name: spec.name.clone(),
        version: spec.version.clone(),
        path,
        env_var: spec.env_var.clone(),
    }
}

/// Unpack a zip archive into `dest`.
///
/// Entries are written to a sibling temporary directory which is renamed
/// into place once every entry has been extracted, so a failed extraction
/// leaves nothing behind at `dest`.
fn extract_zip(data: &[u8], dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| Error::Fetch(format!("failed to open zip: {}", e)))?;

    let parent = dest
        .parent()
        .ok_or_else(|| Error::InvalidInput(format!("no parent for {}", dest.display())))?;
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| Error::Fetch(format!("failed to read zip entry: {}", e)))?;

        // Entries escaping the archive root are skipped
        let outpath = match file.enclosed_name() {
            Some(path) => staging.path().join(path),
            None => continue,
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(p) = outpath.parent() {
            std::fs::create_dir_all(p)?;
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        std::fs::write(&outpath, &content)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
        }
    }

    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    // The emptied staging guard ignores the missing directory on drop
    std::fs::rename(staging.path(), dest)?;
    Ok(())
}

fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
