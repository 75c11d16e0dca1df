//! Summary of a finished build

use std::{fmt, path::PathBuf, time::Duration};

use crate::{naming::ChunkId, types::BuildMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    Entry { name: String },
    Chunk { id: ChunkId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedAsset {
    pub kind: AssetKind,
    /// File name inside the output directory
    pub filename: String,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub modules: usize,
    /// Modules a rule transformed; the rest passed through unchanged
    pub transformed: usize,
    pub externals: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub mode: BuildMode,
    pub output_dir: PathBuf,
    pub assets: Vec<EmittedAsset>,
    pub stats: BuildStats,
}

impl BuildReport {
    pub fn entry(&self, name: &str) -> Option<&EmittedAsset> {
        self.assets
            .iter()
            .find(|asset| matches!(&asset.kind, AssetKind::Entry { name: n } if n == name))
    }

    pub fn chunks(&self) -> impl Iterator<Item = &EmittedAsset> {
        self.assets
            .iter()
            .filter(|asset| matches!(asset.kind, AssetKind::Chunk { .. }))
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} build: {} module(s), {} transformed, {} external(s) in {:.2?}",
            self.mode,
            self.stats.modules,
            self.stats.transformed,
            self.stats.externals,
            self.stats.elapsed
        )?;
        for asset in &self.assets {
            let label = match &asset.kind {
                AssetKind::Entry { name } => format!("entry {name}"),
                AssetKind::Chunk { id } => format!("chunk {id}"),
            };
            writeln!(
                f,
                "  {} ({label}, {} bytes)",
                self.output_dir.join(&asset.filename).display(),
                asset.size
            )?;
        }
        Ok(())
    }
}
