//! Stage execution
//!
//! Stages are looked up by name in a [`StageRegistry`] and applied right to left:
//! for the chain `[A, B, C]` the file content goes through `C`, then `B`, then `A`.
//! A failing stage aborts that one file.

use std::{fmt, path::Path, sync::Arc};

use log::trace;
use rustc_hash::FxHashMap;

use crate::{
    context::BuildContext,
    error::PipelineError,
    stage::{StageChain, StageOptions},
};

mod builtin;
mod command;

pub use builtin::{DataUrlStage, MinifyStage, RawStage};
pub use command::CommandStage;

/// What a stage gets to see besides the content it transforms
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub build: &'a BuildContext,
    /// Path of the file (or bundle) being transformed, relative to the project root
    pub path: &'a Path,
}

/// One transform step
///
/// Implementations must be pure with respect to the pipeline: the same content,
/// options and context always produce the same output.
pub trait Stage: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn apply(
        &self,
        content: Vec<u8>,
        options: &StageOptions,
        cx: &StageContext<'_>,
    ) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    stages: FxHashMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `raw`, `minify` and `data-url`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RawStage));
        registry.register(Arc::new(MinifyStage));
        registry.register(Arc::new(DataUrlStage));
        registry
    }

    /// Register a stage under its own name, replacing any previous one
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.name().to_owned(), stage);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(name)
    }

    /// Registered stage names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run `content` through `chain`, last stage first
    pub fn run_chain(
        &self,
        chain: &StageChain,
        content: Vec<u8>,
        cx: &StageContext<'_>,
    ) -> Result<Vec<u8>, PipelineError> {
        chain.iter().rev().try_fold(content, |content, descriptor| {
            let fail = |cause: anyhow::Error| PipelineError::StageFailed {
                path: cx.path.to_path_buf(),
                stage: descriptor.name().to_owned(),
                cause,
            };
            let stage = self
                .get(descriptor.name())
                .ok_or_else(|| fail(anyhow::anyhow!("stage is not registered")))?;

            trace!(
                "{}: applying stage `{}` to {} bytes",
                cx.path.display(),
                descriptor.name(),
                content.len()
            );
            stage.apply(content, descriptor.options(), cx).map_err(fail)
        })
    }
}
