//! Error types for driftgate.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("regeneration failed: {0}")]
    Regeneration(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("missing binding: {0}")]
    MissingBinding(String),

    #[error("checkout failed: {0}")]
    Checkout(String),

    #[error("maintenance failed: {0}")]
    Maintenance(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a failure, used when reporting job outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Toolchain install or tool download failed.
    Provisioning,
    /// The schema compiler invocation failed.
    Regeneration,
    /// A build or verification command failed.
    Build,
    /// The housekeeping task failed.
    Maintenance,
    Other,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Provision(_) | Error::Fetch(_) => FailureKind::Provisioning,
            Error::Regeneration(_) | Error::MissingBinding(_) => FailureKind::Regeneration,
            Error::Build(_) => FailureKind::Build,
            Error::Maintenance(_) => FailureKind::Maintenance,
            _ => FailureKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
