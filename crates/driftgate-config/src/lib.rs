//! KDL configuration parsing for driftgate.
//!
//! This crate handles parsing of:
//! - Pipeline definitions (driftgate.kdl)
//! - Variable interpolation for step commands and environment

pub mod error;
pub mod pipeline;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use pipeline::{load_pipeline, parse_pipeline};
pub use variables::{EventContext, JobContext, VariableContext, VariableContextBuilder};
