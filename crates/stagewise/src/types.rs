//! Value types passed between rule matching, resolution and bundling

use std::{borrow::Cow, fmt, path::Path};

use cow_utils::CowUtils;
use serde::{Deserialize, Serialize};

/// Build mode selected once at build start
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Production,
    #[default]
    Development,
}

impl BuildMode {
    /// Interpret a mode environment variable: only `production` selects production
    pub fn from_env_value(value: &str) -> Self {
        if value.trim() == "production" {
            Self::Production
        } else {
            Self::Development
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one module refers to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// Bundled together with the referencing module
    Static,
    /// Split off into a separately loaded chunk
    Dynamic,
}

impl ReferenceKind {
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// A source path plus the optional auxiliary query it was requested with
///
/// Paths are kept relative to the project root with `/` separators so that rule
/// patterns behave the same on every platform. `button.style?module` parses into
/// the path `button.style` and the query `module`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Request {
    path: String,
    query: Option<String>,
}

impl Request {
    pub fn new(path: &str, query: Option<&str>) -> Self {
        Self {
            path: normalize_separators(path).into_owned(),
            query: query.filter(|q| !q.is_empty()).map(str::to_owned),
        }
    }

    /// Split a raw request at the first `?`
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('?') {
            Some((path, query)) => Self::new(path, Some(query)),
            None => Self::new(raw, None),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.to_string_lossy(), None)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// File extension of the path, without the dot
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.path).extension().and_then(|ext| ext.to_str())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            Some(query) => write!(f, "{}?{}", self.path, query),
            None => f.write_str(&self.path),
        }
    }
}

/// Use `/` separators and drop a leading `./`
pub(crate) fn normalize_separators(path: &str) -> Cow<'_, str> {
    let path = path.cow_replace('\\', "/");
    match path {
        Cow::Borrowed(p) => Cow::Borrowed(p.strip_prefix("./").unwrap_or(p)),
        Cow::Owned(p) => Cow::Owned(p.strip_prefix("./").unwrap_or(&p).to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parse_splits_query() {
        let request = Request::parse("src/button.style?module");
        assert_eq!(request.path(), "src/button.style");
        assert_eq!(request.query(), Some("module"));
        assert_eq!(request.to_string(), "src/button.style?module");
    }

    #[test]
    fn test_request_parse_without_query() {
        let request = Request::parse("./src/theme.style");
        assert_eq!(request.path(), "src/theme.style");
        assert_eq!(request.query(), None);
    }

    #[test]
    fn test_empty_query_is_none() {
        assert_eq!(Request::parse("a.css?").query(), None);
    }

    #[test]
    fn test_request_normalizes_backslashes() {
        let request = Request::new(r"src\client\init.ts", None);
        assert_eq!(request.path(), "src/client/init.ts");
        assert_eq!(request.extension(), Some("ts"));
    }

    #[test]
    fn test_build_mode_from_env_value() {
        assert_eq!(BuildMode::from_env_value("production"), BuildMode::Production);
        assert_eq!(BuildMode::from_env_value("development"), BuildMode::Development);
        assert_eq!(BuildMode::from_env_value("staging"), BuildMode::Development);
        assert_eq!(BuildMode::Production.to_string(), "production");
    }
}
