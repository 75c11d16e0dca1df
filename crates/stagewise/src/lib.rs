//! Rule-driven asset pipeline
//!
//! Source files are matched against an ordered rule list, transformed by the
//! stage chain of the first matching rule, linked into a module graph and emitted
//! as content-hashed entry and chunk bundles.

pub mod bundle_emitter;
pub mod bundle_plan;
pub mod config;
pub mod constants;
pub mod context;
pub mod dirs;
pub mod error;
pub mod externals;
pub mod hooks;
pub mod module_graph;
pub mod naming;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod rules;
pub mod stage;
pub mod stages;
pub mod types;

pub use config::Config;
pub use context::BuildContext;
pub use error::PipelineError;
pub use orchestrator::{CancellationToken, Pipeline, PipelineBuilder};
pub use report::BuildReport;
pub use types::{BuildMode, Request};
