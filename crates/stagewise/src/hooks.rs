//! Pre- and post-build hooks
//!
//! Hooks are an ordered list handed to the pipeline; there is no global
//! registration. Each one sees the frozen build context and the output layout.

use std::fmt;

use anyhow::Result;
use log::info;

use crate::{context::BuildContext, naming::OutputSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Before any file is processed
    Pre,
    /// After all outputs were committed
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre-build"),
            Self::Post => write!(f, "post-build"),
        }
    }
}

pub trait Hook: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn run(&self, phase: HookPhase, cx: &BuildContext, output: &OutputSpec) -> Result<()>;
}

/// Hook built from a closure that only runs in one phase
pub struct FnHook<F> {
    name: String,
    phase: HookPhase,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&BuildContext, &OutputSpec) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, phase: HookPhase, f: F) -> Self {
        Self {
            name: name.into(),
            phase,
            f,
        }
    }
}

impl<F> fmt::Debug for FnHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHook")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl<F> Hook for FnHook<F>
where
    F: Fn(&BuildContext, &OutputSpec) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, phase: HookPhase, cx: &BuildContext, output: &OutputSpec) -> Result<()> {
        if phase == self.phase {
            (self.f)(cx, output)
        } else {
            Ok(())
        }
    }
}

/// Logs the start and the end of a build
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressHook;

impl Hook for ProgressHook {
    fn name(&self) -> &str {
        "progress"
    }

    fn run(&self, phase: HookPhase, cx: &BuildContext, output: &OutputSpec) -> Result<()> {
        match phase {
            HookPhase::Pre => info!(
                "Building v{} in {} mode into {}",
                cx.version(),
                cx.mode(),
                output.path().display()
            ),
            HookPhase::Post => info!("Build complete: {}", output.path().display()),
        }
        Ok(())
    }
}
