//! Per-job working copies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Result;

/// A working copy handed to exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCheckout {
    pub job: String,
    pub root: PathBuf,
    /// Whether `release` removes the directory.
    pub ephemeral: bool,
}

/// Provides isolated checkouts so that no two jobs mutate the same tree.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn prepare(&self, job: &str) -> Result<JobCheckout>;

    async fn release(&self, checkout: JobCheckout) -> Result<()>;
}
