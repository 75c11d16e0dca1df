//! Stage descriptors and immutable stage chains
//!
//! A [`StageDescriptor`] only names a transform and carries its options; the
//! transform itself lives in a [`crate::stages::StageRegistry`]. Chains are listed
//! outermost-first: the last descriptor is closest to the raw source and runs first.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

/// Options handed to a stage; opaque to the pipeline
pub type StageOptions = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
    name: String,
    options: StageOptions,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, StageOptions::new())
    }

    pub fn with_options(name: impl Into<String>, options: StageOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &StageOptions {
        &self.options
    }
}

/// Ordered, shared, never-mutated list of stage descriptors
#[derive(Debug, Clone, PartialEq)]
pub struct StageChain(Arc<[StageDescriptor]>);

impl StageChain {
    pub fn new(stages: Vec<StageDescriptor>) -> Self {
        Self(Arc::from(stages))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StageDescriptor> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(StageDescriptor::name).collect()
    }

    /// New chain with `stage` as the outermost step, i.e. the one that runs last
    pub fn wrapped_by(&self, stage: StageDescriptor) -> Self {
        let mut stages = Vec::with_capacity(self.len() + 1);
        stages.push(stage);
        stages.extend(self.0.iter().cloned());
        Self::new(stages)
    }
}

impl Default for StageChain {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<StageDescriptor> for StageChain {
    fn from_iter<T: IntoIterator<Item = StageDescriptor>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a StageChain {
    type Item = &'a StageDescriptor;
    type IntoIter = std::slice::Iter<'a, StageDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(names: &[&str]) -> StageChain {
        names.iter().map(|name| StageDescriptor::new(*name)).collect()
    }

    #[test]
    fn test_wrapped_by_leaves_original_untouched() {
        let base = chain(&["css", "sass"]);
        let wrapped = base.wrapped_by(StageDescriptor::new("minify"));

        assert_eq!(base.names(), vec!["css", "sass"]);
        assert_eq!(wrapped.names(), vec!["minify", "css", "sass"]);
    }

    #[test]
    fn test_clones_share_storage() {
        let base = chain(&["ts"]);
        let copy = base.clone();
        assert!(std::ptr::eq(base.stages(), copy.stages()));
    }

    #[test]
    fn test_descriptor_options() {
        let mut options = StageOptions::new();
        options.insert("modules".to_owned(), Value::Bool(true));
        let stage = StageDescriptor::with_options("css", options);

        assert_eq!(stage.name(), "css");
        assert_eq!(stage.options().get("modules"), Some(&Value::Bool(true)));
    }
}
