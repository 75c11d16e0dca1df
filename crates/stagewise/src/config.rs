//! Configuration file (`stagewise.toml`) schema and loading
//!
//! The schema mirrors the shape of a declarative front-end build config: entries,
//! output layout, resolution, externals, ordered rules with optional `one_of`
//! branches, build constants, locales and command-backed stages.
//!
//! ```toml
//! version = "10.0.0"
//!
//! [entry]
//! app = "src/client/init.ts"
//!
//! [output]
//! path = "built/client/assets"
//! chunk_filename = "[hash:5].[id].js"
//! public_path = "/assets/"
//!
//! [externals]
//! moment = "moment"
//!
//! [[rules]]
//! test = '\.scss$'
//! exclude = "node_modules"
//! one_of = [
//!     { resource_query = "module", use = ["style", { stage = "css", options = { modules = true } }, "sass"] },
//!     { use = ["style", "css", "sass"] },
//! ]
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    context::LocaleMeta,
    error::PipelineError,
    rules::{ConditionalBranch, Pattern, Rule, RuleTarget},
    stage::{StageChain, StageDescriptor, StageOptions},
    types::BuildMode,
};

/// File name searched for when no explicit config path is given
pub const CONFIG_FILE_NAME: &str = "stagewise.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Version string injected as `_VERSION_`
    pub version: String,
    /// Fixed build mode; when absent the mode comes from `mode_env`
    pub mode: Option<BuildMode>,
    /// Environment variable that selects the mode
    pub mode_env: String,
    /// Bundle name -> entry source, relative to the project root
    pub entry: IndexMap<String, PathBuf>,
    pub output: OutputConfig,
    pub resolve: ResolveConfig,
    /// Module name -> ambient global name
    pub externals: IndexMap<String, String>,
    pub rules: Vec<RuleConfig>,
    /// Additional build constants, serialized as JSON literals
    pub define: IndexMap<String, Value>,
    pub locales: IndexMap<String, LocaleMeta>,
    /// Stages backed by an external program
    pub stages: IndexMap<String, CommandStageConfig>,
    pub optimization: OptimizationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.0.0".to_owned(),
            mode: None,
            mode_env: "NODE_ENV".to_owned(),
            entry: IndexMap::new(),
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
            externals: IndexMap::new(),
            rules: Vec::new(),
            define: IndexMap::new(),
            locales: IndexMap::new(),
            stages: IndexMap::new(),
            optimization: OptimizationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub filename: String,
    pub chunk_filename: String,
    pub public_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dist"),
            filename: "[name].js".to_owned(),
            chunk_filename: "[hash:5].[id].js".to_owned(),
            public_path: "/".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolveConfig {
    /// Extensions tried, in order, when a relative reference has none
    pub extensions: Vec<String>,
    /// Exact specifier -> file, relative to the project root
    pub alias: IndexMap<String, PathBuf>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_owned(), ".ts".to_owned(), ".json".to_owned()],
            alias: IndexMap::new(),
        }
    }
}

/// A stage reference inside `use`: either a bare name or a name with options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageRef {
    Name(String),
    WithOptions {
        stage: String,
        #[serde(default)]
        options: StageOptions,
    },
}

impl StageRef {
    fn to_descriptor(&self) -> StageDescriptor {
        match self {
            Self::Name(name) => StageDescriptor::new(name.clone()),
            Self::WithOptions { stage, options } => {
                StageDescriptor::with_options(stage.clone(), options.clone())
            }
        }
    }
}

fn to_chain(stages: &[StageRef]) -> StageChain {
    stages.iter().map(StageRef::to_descriptor).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    /// Pattern over the request query; a branch without one is the default
    #[serde(default)]
    pub resource_query: Option<String>,
    #[serde(rename = "use")]
    pub stages: Vec<StageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub test: String,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default, rename = "use")]
    pub stages: Option<Vec<StageRef>>,
    #[serde(default)]
    pub one_of: Option<Vec<BranchConfig>>,
}

impl RuleConfig {
    /// Compile this entry into a [`Rule`]; `rule_index` is used for error reporting
    pub fn to_rule(&self, rule_index: usize) -> Result<Rule, PipelineError> {
        let compile = |source: &str| {
            Pattern::new(source).map_err(|source_err| PipelineError::InvalidPattern {
                rule_index,
                pattern: source.to_owned(),
                source: source_err,
            })
        };

        let target = match (&self.stages, &self.one_of) {
            (Some(stages), None) => RuleTarget::Direct(to_chain(stages)),
            (None, Some(branches)) => RuleTarget::Branching(
                branches
                    .iter()
                    .map(|branch| {
                        let stages = to_chain(&branch.stages);
                        Ok(match &branch.resource_query {
                            Some(query) => ConditionalBranch::when_query(compile(query)?, stages),
                            None => ConditionalBranch::default_branch(stages),
                        })
                    })
                    .collect::<Result<_, PipelineError>>()?,
            ),
            (Some(_), Some(_)) => {
                return Err(PipelineError::RuleMisconfigured {
                    rule_index,
                    reason: "`use` and `one_of` are mutually exclusive".to_owned(),
                });
            }
            (None, None) => {
                return Err(PipelineError::RuleMisconfigured {
                    rule_index,
                    reason: "rule needs either `use` or `one_of`".to_owned(),
                });
            }
        };

        let rule = Rule::new(compile(&self.test)?, target);
        match &self.exclude {
            Some(exclude) => Ok(rule.excluding(compile(exclude)?)),
            None => Ok(rule),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandStageConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the process after this many milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizationConfig {
    /// Stage appended to every bundle in production mode. The built-in `minify` only
    /// works line by line; use a command stage for a real minifier.
    pub minimizer: StageRef,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            minimizer: StageRef::Name("minify".to_owned()),
        }
    }
}

impl OptimizationConfig {
    pub fn minimizer_stage(&self) -> StageDescriptor {
        self.minimizer.to_descriptor()
    }
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("Failed to parse stagewise configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&source)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load configuration and return it with the project root it applies to
    ///
    /// Search order when `explicit` is `None`:
    /// 1. `stagewise.toml` in `start_dir` or any of its parents
    /// 2. `stagewise.toml` in the user config directory
    /// 3. built-in defaults, rooted at `start_dir`
    pub fn load(explicit: Option<&Path>, start_dir: &Path) -> Result<(Self, PathBuf)> {
        let found = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_from(start_dir).or_else(crate::dirs::user_config_file),
        };

        let Some(path) = found else {
            debug!("No configuration file found, using defaults");
            return Ok((Self::default(), start_dir.to_path_buf()));
        };

        debug!("Loading configuration from {}", path.display());
        let config = Self::from_file(&path)?;
        let root = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| start_dir.to_path_buf(), Path::to_path_buf);
        Ok((config, root))
    }
}

/// Find `stagewise.toml` by walking up from `start`
pub fn find_config_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
