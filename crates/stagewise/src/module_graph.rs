//! Module graph built while files are processed
//!
//! Nodes are requests (path + query), so `button.scss?module` and `button.scss`
//! are distinct modules with distinct stage chains. Edges are static or dynamic
//! references; every dynamic target is a chunk root and receives a [`ChunkId`]
//! the first time it is discovered.

use std::ops::Range;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, DfsPostOrder, EdgeFiltered},
};
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    naming::{ChunkId, ChunkIdAllocator},
    resolver::Resolved,
    types::{ReferenceKind, Request},
};

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"\bimport\s*\(\s*['"](?P<dynamic>[^'"\n]+)['"]\s*\)"#,
        r#"|\b(?:import|export)\s+(?:[\w*{}\s,$]+?\s+from\s+)?['"](?P<from>[^'"\n]+)['"]"#,
        r#"|\brequire\s*\(\s*['"](?P<require>[^'"\n]+)['"]\s*\)"#,
        r#"|@import\s+(?:url\(\s*)?['"](?P<css>[^'"\n]+)['"]"#,
    ))
    .expect("reference pattern is valid")
});

/// A reference found in module text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedReference {
    pub specifier: String,
    pub kind: ReferenceKind,
    /// Byte range of the whole reference expression
    pub span: Range<usize>,
    /// Byte range of the specifier text, without quotes
    pub specifier_span: Range<usize>,
}

/// Find references in source order
pub fn scan_references(source: &str) -> Vec<ScannedReference> {
    REFERENCE
        .captures_iter(source)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let (specifier, kind) = match caps.name("dynamic") {
                Some(m) => (m, ReferenceKind::Dynamic),
                None => (
                    caps.name("from")
                        .or_else(|| caps.name("require"))
                        .or_else(|| caps.name("css"))?,
                    ReferenceKind::Static,
                ),
            };
            Some(ScannedReference {
                specifier: specifier.as_str().to_owned(),
                kind,
                span: whole.range(),
                specifier_span: specifier.range(),
            })
        })
        .collect()
}

/// A reference after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReference {
    pub scanned: ScannedReference,
    pub target: Resolved,
}

/// Result of running one file through its chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedModule {
    /// Transformed text with build constants substituted
    pub code: String,
    pub references: Vec<ModuleReference>,
    /// Whether a rule matched (as opposed to pass-through)
    pub transformed: bool,
}

#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub request: Request,
    /// `None` until the file was processed successfully
    pub processed: Option<ProcessedModule>,
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    graph: DiGraph<ModuleNode, ReferenceKind>,
    by_request: FxHashMap<Request, NodeIndex>,
    chunk_roots: IndexMap<NodeIndex, ChunkId>,
    chunk_ids: ChunkIdAllocator,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node for `request`, and whether it was newly added
    pub fn add_module(&mut self, request: Request) -> (NodeIndex, bool) {
        if let Some(&index) = self.by_request.get(&request) {
            return (index, false);
        }
        let index = self.graph.add_node(ModuleNode {
            request: request.clone(),
            processed: None,
        });
        self.by_request.insert(request, index);
        (index, true)
    }

    pub fn add_reference(&mut self, from: NodeIndex, to: NodeIndex, kind: ReferenceKind) {
        if !self
            .graph
            .edges_connecting(from, to)
            .any(|edge| *edge.weight() == kind)
        {
            self.graph.add_edge(from, to, kind);
        }
        if kind.is_dynamic() {
            self.mark_chunk_root(to);
        }
    }

    /// Chunk id of `root`, allocating one on first sight
    pub fn mark_chunk_root(&mut self, root: NodeIndex) -> ChunkId {
        let ids = &mut self.chunk_ids;
        *self.chunk_roots.entry(root).or_insert_with(|| ids.allocate())
    }

    pub fn set_processed(&mut self, index: NodeIndex, module: ProcessedModule) {
        self.graph[index].processed = Some(module);
    }

    pub fn node(&self, index: NodeIndex) -> &ModuleNode {
        &self.graph[index]
    }

    pub fn lookup(&self, request: &Request) -> Option<NodeIndex> {
        self.by_request.get(request).copied()
    }

    pub fn chunk_id(&self, root: NodeIndex) -> Option<ChunkId> {
        self.chunk_roots.get(&root).copied()
    }

    /// Chunk roots in id order
    pub fn chunk_roots(&self) -> impl Iterator<Item = (NodeIndex, ChunkId)> + '_ {
        self.chunk_roots.iter().map(|(&root, &id)| (root, id))
    }

    pub fn module_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleNode> {
        self.graph.node_weights()
    }

    /// Modules statically reachable from `root`, dependencies first
    pub fn static_closure(&self, root: NodeIndex) -> Vec<NodeIndex> {
        let statics = EdgeFiltered::from_fn(&self.graph, |edge| {
            *edge.weight() == ReferenceKind::Static
        });
        let mut order = Vec::new();
        let mut dfs = DfsPostOrder::new(&statics, root);
        while let Some(index) = dfs.next(&statics) {
            order.push(index);
        }
        order
    }

    /// Modules reachable from `root` through any kind of reference
    pub fn reachable(&self, root: NodeIndex) -> FxHashSet<NodeIndex> {
        let mut seen = FxHashSet::default();
        let mut dfs = Dfs::new(&self.graph, root);
        while let Some(index) = dfs.next(&self.graph) {
            seen.insert(index);
        }
        seen
    }

    /// Modules that reference `index`
    pub fn importers(&self, index: NodeIndex) -> Vec<&Request> {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|importer| &self.graph[importer].request)
            .collect()
    }
}
