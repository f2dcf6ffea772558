//! Collaborator implementations for driftgate.
//!
//! Provides:
//! - Local process execution
//! - Toolchain provisioning with rustup
//! - Release-archive tool fetching
//! - Per-job checkouts (git worktree or in place)
//! - Stale run cancellation on GitHub Actions

pub mod checkout;
pub mod fetch;
pub mod github;
pub mod local;
pub mod rustup;

pub use checkout::{GitWorktreeCheckout, InPlaceCheckout};
pub use driftgate_core::executor::{
    CommandSpec, Executor, LogLine, LogStream, ProcessHandle, ProcessResult, ProcessStatus,
};
pub use fetch::HttpToolFetcher;
pub use github::GithubRunCanceller;
pub use local::LocalProcessExecutor;
pub use rustup::RustupProvisioner;
