//! Assignment of modules to entry bundles and split chunks
//!
//! An entry bundle holds the static closure of its entry module. A chunk holds the
//! static closure of its root minus whatever is guaranteed to be loaded already,
//! i.e. the modules shared by the static closures of every entry that can reach
//! the chunk.

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use rustc_hash::FxHashSet;

use crate::{module_graph::ModuleGraph, naming::ChunkId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPlan {
    pub name: String,
    pub root: NodeIndex,
    /// Dependencies first; the entry module itself is last
    pub modules: Vec<NodeIndex>,
    /// Chunks reachable from this entry, in id order
    pub chunks: Vec<ChunkId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub id: ChunkId,
    pub root: NodeIndex,
    pub modules: Vec<NodeIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundlePlan {
    pub entries: Vec<EntryPlan>,
    pub chunks: Vec<ChunkPlan>,
}

impl BundlePlan {
    pub fn new(graph: &ModuleGraph, entries: &IndexMap<String, NodeIndex>) -> Self {
        let closures: Vec<(FxHashSet<NodeIndex>, FxHashSet<NodeIndex>)> = entries
            .values()
            .map(|&root| {
                (
                    graph.static_closure(root).into_iter().collect(),
                    graph.reachable(root),
                )
            })
            .collect();

        let chunks: Vec<ChunkPlan> = graph
            .chunk_roots()
            .map(|(root, id)| {
                let mut available: Option<FxHashSet<NodeIndex>> = None;
                for (statics, reachable) in &closures {
                    if !reachable.contains(&root) {
                        continue;
                    }
                    available = Some(match available {
                        None => statics.clone(),
                        Some(shared) => shared.intersection(statics).copied().collect(),
                    });
                }
                let available = available.unwrap_or_default();
                ChunkPlan {
                    id,
                    root,
                    modules: graph
                        .static_closure(root)
                        .into_iter()
                        .filter(|module| *module == root || !available.contains(module))
                        .collect(),
                }
            })
            .collect();

        let entries = entries
            .iter()
            .zip(&closures)
            .map(|((name, &root), (_, reachable))| EntryPlan {
                name: name.clone(),
                root,
                modules: graph.static_closure(root),
                chunks: chunks
                    .iter()
                    .filter(|chunk| reachable.contains(&chunk.root))
                    .map(|chunk| chunk.id)
                    .collect(),
            })
            .collect();

        Self { entries, chunks }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{ReferenceKind, Request};

    #[test]
    fn test_chunk_excludes_modules_every_parent_already_has() {
        let mut graph = ModuleGraph::new();
        let (app, _) = graph.add_module(Request::parse("app.js"));
        let (admin, _) = graph.add_module(Request::parse("admin.js"));
        let (shared, _) = graph.add_module(Request::parse("shared.js"));
        let (app_only, _) = graph.add_module(Request::parse("app-only.js"));
        let (lazy, _) = graph.add_module(Request::parse("lazy.js"));

        graph.add_reference(app, shared, ReferenceKind::Static);
        graph.add_reference(app, app_only, ReferenceKind::Static);
        graph.add_reference(admin, shared, ReferenceKind::Static);
        graph.add_reference(app, lazy, ReferenceKind::Dynamic);
        graph.add_reference(admin, lazy, ReferenceKind::Dynamic);
        graph.add_reference(lazy, shared, ReferenceKind::Static);
        graph.add_reference(lazy, app_only, ReferenceKind::Static);

        let mut entries = IndexMap::new();
        entries.insert("app".to_owned(), app);
        entries.insert("admin".to_owned(), admin);
        let plan = BundlePlan::new(&graph, &entries);

        assert_eq!(plan.chunks.len(), 1);
        let chunk = &plan.chunks[0];
        assert_eq!(chunk.id, ChunkId::new(0));
        // `shared` is in both parents; `app-only` is not in `admin`
        assert_eq!(chunk.modules, vec![app_only, lazy]);

        assert_eq!(plan.entries[0].modules, vec![shared, app_only, app]);
        assert_eq!(plan.entries[0].chunks, vec![ChunkId::new(0)]);
        assert_eq!(plan.entries[1].modules, vec![shared, admin]);
    }

    #[test]
    fn test_unreachable_chunks_are_not_listed() {
        let mut graph = ModuleGraph::new();
        let (app, _) = graph.add_module(Request::parse("app.js"));
        let (worker, _) = graph.add_module(Request::parse("worker.js"));
        let (lazy, _) = graph.add_module(Request::parse("lazy.js"));
        graph.add_reference(app, lazy, ReferenceKind::Dynamic);

        let mut entries = IndexMap::new();
        entries.insert("app".to_owned(), app);
        entries.insert("worker".to_owned(), worker);
        let plan = BundlePlan::new(&graph, &entries);

        assert_eq!(plan.entries[0].chunks, vec![ChunkId::new(0)]);
        assert!(plan.entries[1].chunks.is_empty());
        assert_eq!(plan.chunks[0].modules, vec![lazy]);
    }
}
