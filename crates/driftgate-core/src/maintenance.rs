//! Housekeeping: cancelling stale runs of the same change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::event::TriggerEvent;

/// Settings for stale-run cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSpec {
    /// Environment variable holding the API token.
    pub token_env: String,
    /// `owner/name`; falls back to the CI environment when unset.
    pub repository: Option<String>,
    pub api_url: String,
}

impl Default for CancelSpec {
    fn default() -> Self {
        Self {
            token_env: "GITHUB_TOKEN".to_string(),
            repository: None,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

/// What a cancellation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReport {
    /// Ids of runs that were asked to cancel.
    pub cancelled: Vec<u64>,
}

/// Cancels in-flight runs that a newer run for the same ref supersedes.
#[async_trait]
pub trait RunCanceller: Send + Sync {
    fn name(&self) -> &'static str;

    async fn cancel_stale(&self, spec: &CancelSpec, event: &TriggerEvent) -> Result<CancelReport>;
}
