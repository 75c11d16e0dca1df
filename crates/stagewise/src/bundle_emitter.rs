//! Rendering of entry and chunk bundles
//!
//! Every module becomes a `__stagewise_define` section keyed by its request
//! string. References inside module code are rewritten so that static specifiers
//! name module ids and dynamic imports go through `__stagewise_load`. Externals are
//! bound once per entry bundle to the global the host page provides; they are
//! never read from disk.
//!
//! Module factories live in one registry shared by every bundle on the page. The
//! module cache and chunk manifest are private to each entry bundle, so several
//! entries can be loaded side by side.

use std::fmt::Write as _;

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use serde_json::Value;

use crate::{
    bundle_plan::{BundlePlan, ChunkPlan, EntryPlan},
    externals::global_expression,
    module_graph::ModuleGraph,
    naming::ChunkId,
    resolver::Resolved,
    types::ReferenceKind,
};

const RUNTIME: &str = r#"(function () {
var __stagewise_modules = globalThis.__stagewise_modules || (globalThis.__stagewise_modules = {});
var __stagewise_define = globalThis.__stagewise_define || (globalThis.__stagewise_define = function (id, factory) {
  if (!(id in __stagewise_modules)) __stagewise_modules[id] = factory;
});
var __stagewise_cache = {};
var __stagewise_pending = {};
function __stagewise_require(id) {
  if (id in __stagewise_cache) return __stagewise_cache[id].exports;
  var factory = __stagewise_modules[id];
  if (!factory) throw new Error("stagewise: unknown module " + id);
  var module = (__stagewise_cache[id] = { exports: {} });
  factory(module, module.exports, __stagewise_require);
  return module.exports;
}
function __stagewise_load(chunkId) {
  var chunk = __stagewise_manifest[chunkId];
  if (!__stagewise_pending[chunkId]) {
    __stagewise_pending[chunkId] = new Promise(function (resolve, reject) {
      var script = document.createElement("script");
      script.src = chunk[0];
      script.onload = resolve;
      script.onerror = function () {
        reject(new Error("stagewise: failed to load chunk " + chunkId));
      };
      document.head.appendChild(script);
    });
  }
  return __stagewise_pending[chunkId].then(function () {
    return __stagewise_require(chunk[1]);
  });
}
"#;

/// Closes the scope opened by [`RUNTIME`]
const RUNTIME_END: &str = "})();\n";

/// Where an emitted chunk can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLocation {
    pub url: String,
    /// Module id of the chunk root
    pub module: String,
}

#[derive(Debug, Clone, Copy)]
pub struct BundleEmitter<'a> {
    graph: &'a ModuleGraph,
}

impl<'a> BundleEmitter<'a> {
    pub fn new(graph: &'a ModuleGraph) -> Self {
        Self { graph }
    }

    /// Module id used in emitted code
    pub fn module_id(&self, index: NodeIndex) -> String {
        self.graph.node(index).request.to_string()
    }

    /// Chunk bundle: module sections only
    pub fn render_chunk(&self, chunk: &ChunkPlan) -> String {
        let mut out = format!("// chunk {}\n", chunk.id);
        for &module in &chunk.modules {
            self.write_module(&mut out, module);
        }
        out
    }

    /// Entry bundle: runtime, chunk manifest, external bindings, modules, bootstrap
    pub fn render_entry(
        &self,
        entry: &EntryPlan,
        plan: &BundlePlan,
        locations: &IndexMap<ChunkId, ChunkLocation>,
    ) -> String {
        let mut out = String::from(RUNTIME);

        let manifest: Vec<String> = entry
            .chunks
            .iter()
            .filter_map(|id| {
                let location = locations.get(id)?;
                Some(format!(
                    "{}: [{}, {}]",
                    Value::from(id.to_string()),
                    Value::from(location.url.as_str()),
                    Value::from(location.module.as_str())
                ))
            })
            .collect();
        let _ = writeln!(out, "var __stagewise_manifest = {{{}}};", manifest.join(", "));

        let chunk_modules = plan
            .chunks
            .iter()
            .filter(|chunk| entry.chunks.contains(&chunk.id))
            .flat_map(|chunk| chunk.modules.iter());
        for (module, global) in self.externals(entry.modules.iter().chain(chunk_modules)) {
            let _ = writeln!(
                out,
                "__stagewise_define({}, function (module) {{ module.exports = {}; }});",
                Value::from(module.as_str()),
                global_expression(&global)
            );
        }

        for &module in &entry.modules {
            self.write_module(&mut out, module);
        }
        let _ = writeln!(
            out,
            "__stagewise_require({});",
            Value::from(self.module_id(entry.root))
        );
        out.push_str(RUNTIME_END);
        out
    }

    /// Externals referenced by `modules`, first reference first
    fn externals<'m>(
        &self,
        modules: impl Iterator<Item = &'m NodeIndex>,
    ) -> IndexMap<String, String> {
        let mut externals = IndexMap::new();
        for &index in modules {
            let Some(processed) = &self.graph.node(index).processed else {
                continue;
            };
            for reference in &processed.references {
                if let Resolved::External { module, global } = &reference.target {
                    externals
                        .entry(module.clone())
                        .or_insert_with(|| global.clone());
                }
            }
        }
        externals
    }

    fn write_module(&self, out: &mut String, index: NodeIndex) {
        let code = self.rewrite(index);
        let _ = writeln!(
            out,
            "__stagewise_define({}, function (module, exports, require) {{",
            Value::from(self.module_id(index))
        );
        out.push_str(&code);
        if !code.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("});\n");
    }

    /// Module code with references pointing at module ids and chunk loaders
    fn rewrite(&self, index: NodeIndex) -> String {
        let Some(processed) = &self.graph.node(index).processed else {
            return String::new();
        };
        let mut code = processed.code.clone();
        // Back to front so earlier spans stay valid
        for reference in processed.references.iter().rev() {
            let scanned = &reference.scanned;
            match (&reference.target, scanned.kind) {
                (Resolved::Local(request), ReferenceKind::Static) => {
                    code.replace_range(scanned.specifier_span.clone(), &request.to_string());
                }
                (Resolved::Local(request), ReferenceKind::Dynamic) => {
                    if let Some(id) = self
                        .graph
                        .lookup(request)
                        .and_then(|target| self.graph.chunk_id(target))
                    {
                        code.replace_range(
                            scanned.span.clone(),
                            &format!("__stagewise_load({id})"),
                        );
                    }
                }
                (Resolved::External { module, .. }, ReferenceKind::Dynamic) => {
                    code.replace_range(
                        scanned.span.clone(),
                        &format!(
                            "Promise.resolve(__stagewise_require({}))",
                            Value::from(module.as_str())
                        ),
                    );
                }
                // The specifier already is the id of the external binding
                (Resolved::External { .. }, ReferenceKind::Static) => {}
            }
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        module_graph::{ModuleReference, ProcessedModule, scan_references},
        types::Request,
    };

    fn process(graph: &mut ModuleGraph, path: &str, code: &str, targets: Vec<Resolved>) -> NodeIndex {
        let (index, _) = graph.add_module(Request::parse(path));
        let references = scan_references(code)
            .into_iter()
            .zip(targets)
            .map(|(scanned, target)| ModuleReference { scanned, target })
            .collect::<Vec<_>>();
        for reference in &references {
            if let Resolved::Local(request) = &reference.target {
                let (target, _) = graph.add_module(request.clone());
                graph.add_reference(index, target, reference.scanned.kind);
            }
        }
        graph.set_processed(
            index,
            ProcessedModule {
                code: code.to_owned(),
                references,
                transformed: true,
            },
        );
        index
    }

    fn sample() -> (ModuleGraph, IndexMap<String, NodeIndex>) {
        let mut graph = ModuleGraph::new();
        let app = process(
            &mut graph,
            "src/app.js",
            "var moment = require('moment');\nvar util = require('./util');\nimport('./lazy').then(function (m) { m.run(); });\n",
            vec![
                Resolved::External {
                    module: "moment".to_owned(),
                    global: "moment".to_owned(),
                },
                Resolved::Local(Request::parse("src/util.js")),
                Resolved::Local(Request::parse("src/lazy.js")),
            ],
        );
        process(&mut graph, "src/util.js", "module.exports = 1;", vec![]);
        process(
            &mut graph,
            "src/lazy.js",
            "exports.run = function () {};\n",
            vec![],
        );
        let mut entries = IndexMap::new();
        entries.insert("app".to_owned(), app);
        (graph, entries)
    }

    #[test]
    fn test_chunk_bundle() {
        let (graph, entries) = sample();
        let plan = BundlePlan::new(&graph, &entries);
        let emitter = BundleEmitter::new(&graph);

        insta::assert_snapshot!(emitter.render_chunk(&plan.chunks[0]), @r#"
        // chunk 0
        __stagewise_define("src/lazy.js", function (module, exports, require) {
        exports.run = function () {};
        });
        "#);
    }

    #[test]
    fn test_entry_bundle() {
        let (graph, entries) = sample();
        let plan = BundlePlan::new(&graph, &entries);
        let emitter = BundleEmitter::new(&graph);

        let mut locations = IndexMap::new();
        locations.insert(
            ChunkId::new(0),
            ChunkLocation {
                url: "/abcde.0.js".to_owned(),
                module: "src/lazy.js".to_owned(),
            },
        );
        let bundle = emitter.render_entry(&plan.entries[0], &plan, &locations);
        let body = bundle
            .strip_prefix(RUNTIME)
            .and_then(|body| body.strip_suffix(RUNTIME_END))
            .unwrap();

        insta::assert_snapshot!(body, @r#"
        var __stagewise_manifest = {"0": ["/abcde.0.js", "src/lazy.js"]};
        __stagewise_define("moment", function (module) { module.exports = globalThis["moment"]; });
        __stagewise_define("src/util.js", function (module, exports, require) {
        module.exports = 1;
        });
        __stagewise_define("src/app.js", function (module, exports, require) {
        var moment = require('moment');
        var util = require('src/util.js');
        __stagewise_load(0).then(function (m) { m.run(); });
        });
        __stagewise_require("src/app.js");
        "#);
    }

    #[test]
    fn test_entries_keep_their_own_manifest() {
        let (mut graph, mut entries) = sample();
        let admin = process(
            &mut graph,
            "src/admin.js",
            "require('./util');",
            vec![Resolved::Local(Request::parse("src/util.js"))],
        );
        entries.insert("admin".to_owned(), admin);
        let plan = BundlePlan::new(&graph, &entries);
        let emitter = BundleEmitter::new(&graph);

        let mut locations = IndexMap::new();
        locations.insert(
            ChunkId::new(0),
            ChunkLocation {
                url: "/abcde.0.js".to_owned(),
                module: "src/lazy.js".to_owned(),
            },
        );
        let app = emitter.render_entry(&plan.entries[0], &plan, &locations);
        let admin = emitter.render_entry(&plan.entries[1], &plan, &locations);

        for bundle in [&app, &admin] {
            assert!(bundle.starts_with("(function () {\n"));
            assert!(bundle.ends_with("})();\n"));
        }
        assert!(app.contains("var __stagewise_manifest = {\"0\": [\"/abcde.0.js\", \"src/lazy.js\"]};"));
        assert!(admin.contains("var __stagewise_manifest = {};"));
        assert!(admin.ends_with("__stagewise_require(\"src/admin.js\");\n})();\n"));
    }

    #[test]
    fn test_dynamic_external_is_never_loaded_as_chunk() {
        let mut graph = ModuleGraph::new();
        let app = process(
            &mut graph,
            "app.js",
            "import('vue');",
            vec![Resolved::External {
                module: "vue".to_owned(),
                global: "Vue.default".to_owned(),
            }],
        );
        let mut entries = IndexMap::new();
        entries.insert("app".to_owned(), app);
        let plan = BundlePlan::new(&graph, &entries);
        let bundle = BundleEmitter::new(&graph).render_entry(&plan.entries[0], &plan, &IndexMap::new());

        assert!(plan.chunks.is_empty());
        assert!(bundle.contains("Promise.resolve(__stagewise_require(\"vue\"));"));
        assert!(bundle.contains("module.exports = globalThis[\"Vue\"][\"default\"];"));
        assert_eq!(bundle.matches("__stagewise_define(\"vue\"").count(), 1);
    }
}
