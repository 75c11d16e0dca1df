//! Modules supplied by the host page instead of the bundle
//!
//! A reference to a listed module is never read or inlined. The bundle binds the
//! module name to the configured ambient global instead.

use std::{fmt::Write as _, path::PathBuf};

use indexmap::IndexMap;
use serde_json::Value;

use crate::{error::PipelineError, types::normalize_separators};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalReferenceTable {
    modules: IndexMap<String, String>,
}

impl ExternalReferenceTable {
    pub fn new(modules: IndexMap<String, String>) -> Self {
        Self { modules }
    }

    /// Global binding for `module`, if it is external
    pub fn global_for(&self, module: &str) -> Option<&str> {
        self.modules.get(module).map(String::as_str)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.modules.iter().map(|(m, g)| (m.as_str(), g.as_str()))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Reject names that would also be bundled locally
    ///
    /// A name is ambiguous when it is also an entry name, an entry source path or
    /// an alias key.
    pub fn validate(
        &self,
        entries: &IndexMap<String, PathBuf>,
        aliases: &IndexMap<String, PathBuf>,
    ) -> Result<(), PipelineError> {
        for name in self.modules.keys() {
            if entries.contains_key(name) {
                return Err(PipelineError::AmbiguousExternal {
                    name: name.clone(),
                    conflict: format!("entry `{name}`"),
                });
            }
            if let Some((entry, _)) = entries
                .iter()
                .find(|(_, source)| normalize_separators(&source.to_string_lossy()) == name.as_str())
            {
                return Err(PipelineError::AmbiguousExternal {
                    name: name.clone(),
                    conflict: format!("the source of entry `{entry}`"),
                });
            }
            if aliases.contains_key(name) {
                return Err(PipelineError::AmbiguousExternal {
                    name: name.clone(),
                    conflict: "a resolve alias".to_owned(),
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for ExternalReferenceTable {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// JavaScript expression reading a (possibly dotted) global, e.g. `globalThis["Vue"]["default"]`
pub fn global_expression(global: &str) -> String {
    global
        .split('.')
        .fold(String::from("globalThis"), |mut expr, part| {
            let _ = write!(expr, "[{}]", Value::from(part));
            expr
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ExternalReferenceTable {
        [("moment".to_owned(), "moment".to_owned())]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_lookup() {
        let table = table();
        assert_eq!(table.global_for("moment"), Some("moment"));
        assert_eq!(table.global_for("moment/locale/ja"), None);
        assert!(!table.contains("vue"));
    }

    #[test]
    fn test_global_expression() {
        assert_eq!(global_expression("moment"), r#"globalThis["moment"]"#);
        assert_eq!(
            global_expression("Vue.default"),
            r#"globalThis["Vue"]["default"]"#
        );
        assert_eq!(
            global_expression(r#"odd"name\"#),
            r#"globalThis["odd\"name\\"]"#
        );
    }

    #[test]
    fn test_external_clashing_with_entry_is_rejected() {
        let mut entries = IndexMap::new();
        entries.insert("moment".to_owned(), PathBuf::from("src/moment.ts"));
        let err = table().validate(&entries, &IndexMap::new()).unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousExternal { ref name, .. } if name == "moment"));
    }

    #[test]
    fn test_external_clashing_with_alias_is_rejected() {
        let mut aliases = IndexMap::new();
        aliases.insert("moment".to_owned(), PathBuf::from("vendor/moment.js"));
        assert!(table().validate(&IndexMap::new(), &aliases).is_err());
    }

    #[test]
    fn test_disjoint_names_validate() {
        let mut entries = IndexMap::new();
        entries.insert("app".to_owned(), PathBuf::from("src/init.ts"));
        assert!(table().validate(&entries, &IndexMap::new()).is_ok());
    }
}
