//! Build orchestration
//!
//! A [`Pipeline`] is assembled once from the configuration by a [`PipelineBuilder`]
//! and validated up front: rule patterns, stage names, the minimizer, externals,
//! filename templates and user constants. A build then proceeds in waves: every
//! module discovered by the previous wave is read and transformed in parallel,
//! the results are folded into the module graph in a fixed order, and the next
//! wave is whatever new local references turned up. Once the graph is complete
//! it is split into bundles, rendered, and committed to the output directory in
//! one step.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use indexmap::IndexMap;
use log::{debug, info, warn};
use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::{
    bundle_emitter::{BundleEmitter, ChunkLocation},
    bundle_plan::BundlePlan,
    config::Config,
    constants::DefineTable,
    context::BuildContext,
    error::PipelineError,
    externals::ExternalReferenceTable,
    hooks::{Hook, HookPhase},
    module_graph::{ModuleGraph, ModuleReference, ProcessedModule, scan_references},
    naming::{OutputNamer, OutputSpec},
    report::{AssetKind, BuildReport, BuildStats, EmittedAsset},
    resolver::{ModuleResolver, Resolved},
    rules::{RuleMatch, RuleSet},
    stage::{StageChain, StageDescriptor},
    stages::{CommandStage, Stage, StageContext, StageRegistry},
    types::{BuildMode, Request},
};

/// Cooperative cancellation shared between a build and whoever may stop it
///
/// Cancelling stops new files from being dispatched; stages already running are
/// allowed to finish. Nothing is written to the output directory afterwards.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct PipelineBuilder {
    config: Config,
    root: PathBuf,
    registry: StageRegistry,
    hooks: Vec<Arc<dyn Hook>>,
    output_path: Option<PathBuf>,
}

impl PipelineBuilder {
    /// Builder with the shipped stages plus every command stage from `config`
    pub fn from_config(config: &Config, root: impl Into<PathBuf>) -> Self {
        let mut registry = StageRegistry::with_builtins();
        for (name, stage) in &config.stages {
            debug!("Registering command stage `{name}` ({})", stage.command);
            registry.register(Arc::new(CommandStage::from_config(name, stage)));
        }
        Self {
            config: config.clone(),
            root: root.into(),
            registry,
            hooks: Vec::new(),
            output_path: None,
        }
    }

    /// Register an additional stage; replaces a stage of the same name
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.registry.register(stage);
        self
    }

    /// Append a hook; hooks run in the order they were added
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Write outputs to `path` instead of `output.path`
    #[must_use]
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn finish(self) -> Result<Pipeline, PipelineError> {
        let Self {
            config,
            root,
            registry,
            hooks,
            output_path,
        } = self;

        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(rule_index, rule)| rule.to_rule(rule_index))
            .collect::<Result<Vec<_>, _>>()?;
        let rules = RuleSet::new(rules)?;
        for (rule_index, rule) in rules.rules().iter().enumerate() {
            for chain in rule.chains() {
                if let Some(stage) = chain.names().into_iter().find(|name| !registry.contains(name)) {
                    return Err(PipelineError::UnknownStage {
                        rule_index,
                        stage: stage.to_owned(),
                    });
                }
            }
        }

        let minimizer = config.optimization.minimizer_stage();
        if !registry.contains(minimizer.name()) {
            return Err(PipelineError::UnknownMinimizer {
                stage: minimizer.name().to_owned(),
            });
        }

        let externals = ExternalReferenceTable::new(config.externals.clone());
        externals.validate(&config.entry, &config.resolve.alias)?;

        // Names are checked now; values depend on the context of each build
        DefineTable::from_context(
            &BuildContext::new(BuildMode::default(), config.version.as_str()),
            &config.define,
        )?;

        let output_dir = output_path.unwrap_or_else(|| root.join(&config.output.path));
        if root.starts_with(&output_dir) {
            return Err(PipelineError::OutputDirectory {
                path: output_dir,
                reason: "must not contain the project root".to_owned(),
            });
        }
        // The output directory is replaced wholesale on commit
        if let Some(source) = config
            .entry
            .values()
            .chain(config.resolve.alias.values())
            .map(|source| root.join(source))
            .find(|source| source.starts_with(&output_dir))
        {
            return Err(PipelineError::OutputDirectory {
                path: output_dir,
                reason: format!("must not contain the source file {}", source.display()),
            });
        }
        let output = OutputSpec::new(
            output_dir,
            &config.output.filename,
            &config.output.chunk_filename,
            config.output.public_path.as_str(),
        )?;

        if config.entry.is_empty() {
            warn!("No entries configured; the build will not emit anything");
        }
        let entries = config
            .entry
            .iter()
            .map(|(name, source)| (name.clone(), Request::from_path(source)))
            .collect();

        let resolver = ModuleResolver::new(&root, externals)
            .with_extensions(config.resolve.extensions.clone())
            .with_aliases(&config.resolve.alias);

        debug!(
            "Pipeline ready: {} rule(s), {} entr(y/ies), stages {:?}",
            rules.len(),
            config.entry.len(),
            registry.names()
        );

        Ok(Pipeline {
            root,
            rules,
            registry,
            resolver,
            output,
            entries,
            define: config.define,
            minimizer,
            hooks,
        })
    }
}

/// Bundle text before it is written
#[derive(Debug)]
struct RenderedAsset {
    asset: EmittedAsset,
    content: Vec<u8>,
}

#[derive(Debug)]
pub struct Pipeline {
    root: PathBuf,
    rules: RuleSet,
    registry: StageRegistry,
    resolver: ModuleResolver,
    output: OutputSpec,
    entries: IndexMap<String, Request>,
    define: IndexMap<String, Value>,
    minimizer: StageDescriptor,
    hooks: Vec<Arc<dyn Hook>>,
}

impl Pipeline {
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn stages(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn output(&self) -> &OutputSpec {
        &self.output
    }

    pub fn entries(&self) -> &IndexMap<String, Request> {
        &self.entries
    }

    /// The rule and chain a raw request such as `src/a.scss?module` would get
    pub fn explain(&self, request: &str) -> Result<RuleMatch, PipelineError> {
        self.rules.match_request(&Request::parse(request))
    }

    /// Chain applied to every finished bundle: the minimizer in production, nothing otherwise
    pub fn bundle_chain(&self, mode: BuildMode) -> StageChain {
        if mode.is_production() {
            StageChain::empty().wrapped_by(self.minimizer.clone())
        } else {
            StageChain::empty()
        }
    }

    pub fn build(
        &self,
        cx: &BuildContext,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, PipelineError> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.run_hooks(HookPhase::Pre, cx)?;

        let define = DefineTable::from_context(cx, &self.define)?;
        let (graph, roots) = self.discover(cx, &define, cancel)?;
        let plan = BundlePlan::new(&graph, &roots);
        let rendered = self.render(&graph, &plan, cx)?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.commit(&rendered)?;

        let externals: FxHashSet<&str> = graph
            .modules()
            .filter_map(|node| node.processed.as_ref())
            .flat_map(|module| &module.references)
            .filter_map(|reference| match &reference.target {
                Resolved::External { module, .. } => Some(module.as_str()),
                Resolved::Local(_) => None,
            })
            .collect();
        let report = BuildReport {
            mode: cx.mode(),
            output_dir: self.output.path().to_path_buf(),
            assets: rendered.into_iter().map(|rendered| rendered.asset).collect(),
            stats: BuildStats {
                modules: graph.module_count(),
                transformed: graph
                    .modules()
                    .filter(|node| node.processed.as_ref().is_some_and(|m| m.transformed))
                    .count(),
                externals: externals.len(),
                elapsed: started.elapsed(),
            },
        };
        info!(
            "Emitted {} asset(s) from {} module(s) in {:.2?}",
            report.assets.len(),
            report.stats.modules,
            report.stats.elapsed
        );

        self.run_hooks(HookPhase::Post, cx)?;
        Ok(report)
    }

    fn run_hooks(&self, phase: HookPhase, cx: &BuildContext) -> Result<(), PipelineError> {
        for hook in &self.hooks {
            debug!("Running {phase} hook `{}`", hook.name());
            hook.run(phase, cx, &self.output)
                .map_err(|cause| PipelineError::Hook {
                    phase,
                    hook: hook.name().to_owned(),
                    cause,
                })?;
        }
        Ok(())
    }

    /// Process every module reachable from the entries
    fn discover(
        &self,
        cx: &BuildContext,
        define: &DefineTable,
        cancel: &CancellationToken,
    ) -> Result<(ModuleGraph, IndexMap<String, NodeIndex>), PipelineError> {
        let mut graph = ModuleGraph::new();
        let mut roots = IndexMap::with_capacity(self.entries.len());
        let mut wave = Vec::new();
        // Declaration order of `[entry]`
        for (name, request) in &self.entries {
            let (index, added) = graph.add_module(request.clone());
            roots.insert(name.clone(), index);
            if added {
                wave.push(index);
            }
        }

        let mut failures = Vec::new();
        let mut depth = 0;
        while !wave.is_empty() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            debug!("Wave {depth}: {} module(s)", wave.len());

            let units: Vec<(NodeIndex, Request)> = wave
                .iter()
                .map(|&index| (index, graph.node(index).request.clone()))
                .collect();
            let results: Vec<_> = units
                .into_par_iter()
                .map(|(index, request)| {
                    if cancel.is_cancelled() {
                        return (index, Err(PipelineError::Cancelled));
                    }
                    (index, self.process(&request, cx, define))
                })
                .collect();

            // Folded in wave order so chunk ids do not depend on thread timing
            let mut next = Vec::new();
            let mut cancelled = false;
            for (index, result) in results {
                match result {
                    Ok(module) => {
                        for reference in &module.references {
                            if let Resolved::Local(target) = &reference.target {
                                let (target_index, added) = graph.add_module(target.clone());
                                graph.add_reference(index, target_index, reference.scanned.kind);
                                if added {
                                    next.push(target_index);
                                }
                            }
                        }
                        graph.set_processed(index, module);
                    }
                    Err(PipelineError::Cancelled) => cancelled = true,
                    Err(err) => {
                        warn!("{err}");
                        failures.push(err);
                    }
                }
            }
            if cancelled {
                return Err(PipelineError::Cancelled);
            }
            wave = next;
            depth += 1;
        }

        if failures.is_empty() {
            Ok((graph, roots))
        } else {
            Err(PipelineError::BuildFailed(failures))
        }
    }

    /// Read, transform and scan one module
    fn process(
        &self,
        request: &Request,
        cx: &BuildContext,
        define: &DefineTable,
    ) -> Result<ProcessedModule, PipelineError> {
        let path = Path::new(request.path());
        let source = fs::read(self.root.join(path)).map_err(|err| PipelineError::io(path, err))?;

        let matched = self.rules.match_request(request)?;
        let content = match matched.stages() {
            Some(chain) => {
                self.registry
                    .run_chain(chain, source, &StageContext { build: cx, path })?
            }
            None => source,
        };

        let code = String::from_utf8(content).map_err(|_| PipelineError::BinaryModule {
            path: path.to_path_buf(),
        })?;
        let code = define.substitute(path, &code)?.into_owned();

        let references = scan_references(&code)
            .into_iter()
            .map(|scanned| {
                let target = self.resolver.resolve(request, &scanned.specifier)?;
                Ok(ModuleReference { scanned, target })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        Ok(ProcessedModule {
            code,
            references,
            transformed: matched.stages().is_some(),
        })
    }

    /// Render chunks first so entry manifests can point at their hashed names
    fn render(
        &self,
        graph: &ModuleGraph,
        plan: &BundlePlan,
        cx: &BuildContext,
    ) -> Result<Vec<RenderedAsset>, PipelineError> {
        let emitter = BundleEmitter::new(graph);
        let namer = OutputNamer::new(&self.output);
        let chain = self.bundle_chain(cx.mode());

        let mut rendered = Vec::with_capacity(plan.entries.len() + plan.chunks.len());
        let mut locations = IndexMap::with_capacity(plan.chunks.len());
        for chunk in &plan.chunks {
            let source = graph.node(chunk.root).request.path();
            let content = self.finish_bundle(&chain, emitter.render_chunk(chunk), source, cx)?;
            let filename = namer.chunk_filename(chunk.id, &content);
            locations.insert(
                chunk.id,
                ChunkLocation {
                    url: namer.public_url(&filename),
                    module: emitter.module_id(chunk.root),
                },
            );
            rendered.push(RenderedAsset {
                asset: EmittedAsset {
                    kind: AssetKind::Chunk { id: chunk.id },
                    filename,
                    size: content.len(),
                },
                content,
            });
        }

        for entry in &plan.entries {
            let source = graph.node(entry.root).request.path();
            let content = self.finish_bundle(
                &chain,
                emitter.render_entry(entry, plan, &locations),
                source,
                cx,
            )?;
            let filename = namer.entry_filename(&entry.name, &content);
            rendered.push(RenderedAsset {
                asset: EmittedAsset {
                    kind: AssetKind::Entry {
                        name: entry.name.clone(),
                    },
                    filename,
                    size: content.len(),
                },
                content,
            });
        }
        Ok(rendered)
    }

    fn finish_bundle(
        &self,
        chain: &StageChain,
        bundle: String,
        source: &str,
        cx: &BuildContext,
    ) -> Result<Vec<u8>, PipelineError> {
        if chain.is_empty() {
            return Ok(bundle.into_bytes());
        }
        let path = Path::new(source);
        self.registry
            .run_chain(chain, bundle.into_bytes(), &StageContext { build: cx, path })
    }

    /// Write everything into a staging directory, then swap it in
    fn commit(&self, rendered: &[RenderedAsset]) -> Result<(), PipelineError> {
        let output = self.output.path();
        let parent = output
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let dir_name = output
            .file_name()
            .map_or_else(|| "output".into(), |name| name.to_string_lossy());
        let pid = std::process::id();
        let staging = parent.join(format!(".{dir_name}.staging-{pid}"));
        let previous = parent.join(format!(".{dir_name}.previous-{pid}"));

        if let Err(err) = write_staged(&staging, rendered) {
            discard(&staging);
            return Err(err);
        }

        let had_output = output.exists();
        if had_output {
            fs::rename(output, &previous).map_err(|err| {
                discard(&staging);
                PipelineError::io(output, err)
            })?;
        }
        if let Err(err) = fs::rename(&staging, output) {
            if had_output && let Err(restore) = fs::rename(&previous, output) {
                warn!(
                    "Failed to restore {} from {}: {restore}",
                    output.display(),
                    previous.display()
                );
            }
            discard(&staging);
            return Err(PipelineError::io(output, err));
        }
        if had_output {
            discard(&previous);
        }
        debug!("Committed {} file(s) to {}", rendered.len(), output.display());
        Ok(())
    }
}

fn write_staged(staging: &Path, rendered: &[RenderedAsset]) -> Result<(), PipelineError> {
    if staging.exists() {
        fs::remove_dir_all(staging).map_err(|err| PipelineError::io(staging, err))?;
    }
    fs::create_dir_all(staging).map_err(|err| PipelineError::io(staging, err))?;
    for RenderedAsset { asset, content } in rendered {
        let path = staging.join(&asset.filename);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))?;
        }
        fs::write(&path, content).map_err(|err| PipelineError::io(&path, err))?;
    }
    Ok(())
}

fn discard(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        warn!("Failed to remove {}: {err}", dir.display());
    }
}
