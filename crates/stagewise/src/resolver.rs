use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::trace;

use crate::{
    error::PipelineError,
    externals::ExternalReferenceTable,
    types::{Request, normalize_separators},
};

/// Where a reference points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Supplied by the host page under `global`
    External { module: String, global: String },
    /// A project file, relative to the root, with the query of the reference
    Local(Request),
}

/// Resolves reference specifiers against the project root
///
/// Order: external table, alias table, then paths relative to the importing file
/// with the configured extensions tried in order. Bare specifiers that are neither
/// external nor aliased do not resolve.
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    root: PathBuf,
    extensions: Vec<String>,
    /// Alias key -> root-relative target
    aliases: IndexMap<String, String>,
    externals: ExternalReferenceTable,
}

impl ModuleResolver {
    pub fn new(root: impl Into<PathBuf>, externals: ExternalReferenceTable) -> Self {
        Self {
            root: root.into(),
            extensions: Vec::new(),
            aliases: IndexMap::new(),
            externals,
        }
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: &IndexMap<String, PathBuf>) -> Self {
        self.aliases = aliases
            .iter()
            .map(|(key, target)| {
                (
                    key.clone(),
                    normalize_separators(&target.to_string_lossy()).into_owned(),
                )
            })
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn externals(&self) -> &ExternalReferenceTable {
        &self.externals
    }

    /// Resolve `specifier` as written in `importer`
    pub fn resolve(&self, importer: &Request, specifier: &str) -> Result<Resolved, PipelineError> {
        let request = Request::parse(specifier);
        let unresolved = || PipelineError::UnresolvedReference {
            path: PathBuf::from(importer.path()),
            specifier: specifier.to_owned(),
        };

        if let Some(global) = self.externals.global_for(request.path()) {
            trace!("{importer}: `{specifier}` is external ({global})");
            return Ok(Resolved::External {
                module: request.path().to_owned(),
                global: global.to_owned(),
            });
        }

        let candidate = if let Some(target) = self.aliases.get(request.path()) {
            target.clone()
        } else if is_relative(specifier) {
            let base = importer
                .path()
                .rsplit_once('/')
                .map_or("", |(dir, _)| dir);
            join_normalized(base, request.path()).ok_or_else(unresolved)?
        } else {
            return Err(unresolved());
        };

        let found = self.probe(&candidate).ok_or_else(unresolved)?;
        trace!("{importer}: `{specifier}` -> {found}");
        Ok(Resolved::Local(Request::new(&found, request.query())))
    }

    /// Existing file for `candidate`, trying the configured extensions
    fn probe(&self, candidate: &str) -> Option<String> {
        if self.root.join(candidate).is_file() {
            return Some(candidate.to_owned());
        }
        self.extensions
            .iter()
            .map(|ext| format!("{candidate}{ext}"))
            .find(|path| self.root.join(path).is_file())
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Join `relative` onto `base` and fold `.`/`..`; `None` if it escapes the root
fn join_normalized(base: &str, relative: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in base.split('/').chain(relative.split('/')) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }
    Some(parts.join("/"))
}
