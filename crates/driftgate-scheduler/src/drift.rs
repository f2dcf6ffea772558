//! Content digests of a generated source tree.

use driftgate_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Per-file SHA-256 digests of a directory tree, keyed by path relative to
/// the tree root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    files: BTreeMap<PathBuf, String>,
}

impl TreeSnapshot {
    /// Digest every regular file below `root`. A missing root is an empty tree.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        if root.exists() {
            walk(root, root, &mut files)?;
        }
        Ok(Self { files })
    }

    /// Like [`TreeSnapshot::capture`] but off the async runtime.
    pub async fn capture_async(root: PathBuf) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::capture(&root))
            .await
            .map_err(|e| Error::Internal(format!("digest task failed: {}", e)))?
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Digest of the whole tree: paths and contents, in path order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, digest) in &self.files {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update(digest.as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    /// Files added, removed or modified in `after` relative to `self`.
    pub fn changed(&self, after: &TreeSnapshot) -> Vec<PathBuf> {
        let paths: BTreeSet<&PathBuf> = self.files.keys().chain(after.files.keys()).collect();
        paths
            .into_iter()
            .filter(|p| self.files.get(*p) != after.files.get(*p))
            .cloned()
            .collect()
    }
}

fn walk(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk(root, &path, files)?;
        } else if file_type.is_file() {
            let content = std::fs::read(&path)?;
            let relative = path
                .strip_prefix(root)
                .map_err(|e| Error::Internal(e.to_string()))?
                .to_path_buf();
            files.insert(relative, hex::encode(Sha256::digest(&content)));
        }
    }
    Ok(())
}
