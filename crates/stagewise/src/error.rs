//! Error types for the pipeline
//!
//! Configuration problems (bad patterns, unknown stages, ambiguous externals) are
//! reported when the pipeline is constructed. Per-file problems (stage failures,
//! unresolved constants or references) are collected while the build runs and
//! surfaced together as [`PipelineError::BuildFailed`].

use std::path::PathBuf;

use thiserror::Error;

use crate::hooks::HookPhase;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A `test`, `exclude` or `resource_query` pattern failed to compile
    #[error("rule #{rule_index}: invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        rule_index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Structural problem with a rule (no target, two default branches, ...)
    #[error("rule #{rule_index}: {reason}")]
    RuleMisconfigured { rule_index: usize, reason: String },

    /// A rule names a stage nobody registered
    #[error("rule #{rule_index}: unknown stage `{stage}`")]
    UnknownStage { rule_index: usize, stage: String },

    #[error("optimization.minimizer: unknown stage `{stage}`")]
    UnknownMinimizer { stage: String },

    /// A branching rule matched the path but none of its branches applied
    #[error(
        "{path}: rule #{rule_index} matched but no branch applies and the rule has no default \
         branch"
    )]
    NoBranchMatched { path: String, rule_index: usize },

    /// A transform stage returned an error
    #[error("{}: stage `{stage}` failed: {cause:#}", path.display())]
    StageFailed {
        path: PathBuf,
        stage: String,
        cause: anyhow::Error,
    },

    /// The stage chain produced output that cannot be embedded into a script bundle
    #[error("{}: module output is not valid UTF-8; add a rule that encodes it", path.display())]
    BinaryModule { path: PathBuf },

    /// A build constant token appears in source but has no value
    #[error("{}: unresolved build constant `{token}`", path.display())]
    UnresolvedConstant { path: PathBuf, token: String },

    /// A user-defined constant has an invalid name or shadows a built-in one
    #[error("invalid build constant `{token}`: {reason}")]
    InvalidConstant { token: String, reason: String },

    /// An external module name collides with a locally bundled target
    #[error("external module `{name}` is also declared as {conflict}")]
    AmbiguousExternal { name: String, conflict: String },

    /// A reference could not be resolved to a file or an external
    #[error("{}: cannot resolve `{specifier}`", path.display())]
    UnresolvedReference { path: PathBuf, specifier: String },

    /// An output filename template is malformed
    #[error("invalid filename template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// The output directory cannot be owned by the build
    #[error("output directory {}: {reason}", path.display())]
    OutputDirectory { path: PathBuf, reason: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} hook `{hook}` failed: {cause:#}")]
    Hook {
        phase: HookPhase,
        hook: String,
        cause: anyhow::Error,
    },

    #[error("build cancelled")]
    Cancelled,

    /// One or more files failed; every independent file was still processed
    #[error(
        "build failed with {} error(s):\n{}",
        .0.len(),
        .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n")
    )]
    BuildFailed(Vec<PipelineError>),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Individual failures, flattening an aggregate build failure
    pub fn failures(&self) -> Vec<&Self> {
        match self {
            Self::BuildFailed(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }
}
