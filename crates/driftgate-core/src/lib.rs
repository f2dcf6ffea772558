//! Core domain types and traits for driftgate.
//!
//! This crate contains:
//! - Trigger events and ref/path filter patterns
//! - Pipeline, job and step definitions
//! - Typed step bindings
//! - Collaborator traits (executor, toolchain provisioner, tool fetcher,
//!   checkout provider, stale-run canceller)

pub mod bindings;
pub mod checkout;
pub mod error;
pub mod event;
pub mod executor;
pub mod id;
pub mod maintenance;
pub mod pattern;
pub mod pipeline;
pub mod tool;
pub mod toolchain;

pub use error::{Error, FailureKind, Result};
pub use id::ResourceId;
