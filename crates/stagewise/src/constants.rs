//! Build-time constant injection
//!
//! The build context is serialized into a table of identifier -> literal pairs
//! that are substituted into module source text. Identifiers follow the
//! `_UPPER_CASE_` shape; any such token without a table entry fails the build
//! instead of silently becoming an empty value at runtime.

use std::{borrow::Cow, path::Path};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Match, Regex};
use serde_json::{Value, json};

use crate::{context::BuildContext, error::PipelineError};

/// Version string, e.g. `"10.0.0"`
pub const VERSION_TOKEN: &str = "_VERSION_";
/// Locale list as `[[code, displayName], ...]`
pub const LANGS_TOKEN: &str = "_LANGS_";
/// Active mode string
pub const ENV_TOKEN: &str = "_ENV_";

const BUILTIN_TOKENS: [&str; 3] = [VERSION_TOKEN, LANGS_TOKEN, ENV_TOKEN];

static CONSTANT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b_[A-Z][A-Z0-9_]*_\b").expect("constant token pattern is valid"));

/// Whether `name` has the shape of an injectable constant
pub fn is_constant_token(name: &str) -> bool {
    CONSTANT_TOKEN
        .find(name)
        .is_some_and(|m| m.start() == 0 && m.end() == name.len())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefineTable {
    entries: IndexMap<String, String>,
}

impl DefineTable {
    /// Build the table from the context plus user-defined constants
    pub fn from_context(
        cx: &BuildContext,
        extra: &IndexMap<String, Value>,
    ) -> Result<Self, PipelineError> {
        let langs: Vec<Value> = cx
            .locales()
            .iter()
            .map(|(code, meta)| json!([code, meta.lang]))
            .collect();

        let mut entries = IndexMap::with_capacity(BUILTIN_TOKENS.len() + extra.len());
        entries.insert(
            VERSION_TOKEN.to_owned(),
            Value::from(cx.version()).to_string(),
        );
        entries.insert(LANGS_TOKEN.to_owned(), Value::Array(langs).to_string());
        entries.insert(
            ENV_TOKEN.to_owned(),
            Value::from(cx.mode().as_str()).to_string(),
        );

        for (token, value) in extra {
            if BUILTIN_TOKENS.contains(&token.as_str()) {
                return Err(PipelineError::InvalidConstant {
                    token: token.clone(),
                    reason: "shadows a built-in constant".to_owned(),
                });
            }
            if !is_constant_token(token) {
                return Err(PipelineError::InvalidConstant {
                    token: token.clone(),
                    reason: "constant names must look like `_UPPER_CASE_`".to_owned(),
                });
            }
            entries.insert(token.clone(), value.to_string());
        }

        Ok(Self { entries })
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries.get(token).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every constant token in `source` with its literal
    ///
    /// `path` is only used to report an unresolved token.
    pub fn substitute<'a>(
        &self,
        path: &Path,
        source: &'a str,
    ) -> Result<Cow<'a, str>, PipelineError> {
        let mut tokens = constant_tokens(source).peekable();
        if tokens.peek().is_none() {
            return Ok(Cow::Borrowed(source));
        }

        let mut out = String::with_capacity(source.len());
        let mut last = 0;
        for token in tokens {
            let Some(literal) = self.entries.get(token.as_str()) else {
                return Err(PipelineError::UnresolvedConstant {
                    path: path.to_path_buf(),
                    token: token.as_str().to_owned(),
                });
            };
            out.push_str(&source[last..token.start()]);
            out.push_str(literal);
            last = token.end();
        }
        out.push_str(&source[last..]);
        Ok(Cow::Owned(out))
    }
}

/// Constant tokens in `source`; property accesses such as `obj._ENV_` are not constants
fn constant_tokens(source: &str) -> impl Iterator<Item = Match<'_>> {
    CONSTANT_TOKEN.find_iter(source).filter(|token| {
        let before = &source[..token.start()];
        !before.ends_with('.') || before.ends_with("...")
    })
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::{context::LocaleMeta, types::BuildMode};

    fn context() -> BuildContext {
        let mut locales = IndexMap::new();
        locales.insert("en-US".to_owned(), LocaleMeta::named("English"));
        locales.insert("ja-JP".to_owned(), LocaleMeta::named("日本語"));
        locales.insert("xx".to_owned(), LocaleMeta::default());
        BuildContext::new(BuildMode::Production, "10.0.0").with_locales(locales)
    }

    #[test]
    fn test_builtin_constants() {
        let table = DefineTable::from_context(&context(), &IndexMap::new()).unwrap();

        assert_eq!(table.get(VERSION_TOKEN), Some(r#""10.0.0""#));
        assert_eq!(table.get(ENV_TOKEN), Some(r#""production""#));
        assert_snapshot!(
            table.get(LANGS_TOKEN).unwrap(),
            @r#"[["en-US","English"],["ja-JP","日本語"],["xx",null]]"#
        );
    }

    #[test]
    fn test_substitute_replaces_tokens() {
        let table = DefineTable::from_context(&context(), &IndexMap::new()).unwrap();
        let source = "if (_ENV_ !== 'production') console.log(_VERSION_, _LANGS_.length);";

        let out = table.substitute(Path::new("src/init.ts"), source).unwrap();
        assert_eq!(
            out,
            r#"if ("production" !== 'production') console.log("10.0.0", [["en-US","English"],["ja-JP","日本語"],["xx",null]].length);"#
        );
    }

    #[test]
    fn test_substitute_leaves_lookalikes_alone() {
        let table = DefineTable::from_context(&context(), &IndexMap::new()).unwrap();
        let source = "const MAX_VERSION_ = __dirname + _private_ + _ENV_X;";

        let out = table.substitute(Path::new("a.js"), source).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_property_access_is_not_a_constant() {
        let table = DefineTable::from_context(&context(), &IndexMap::new()).unwrap();

        let out = table
            .substitute(Path::new("a.js"), "config._ENV_ = _ENV_; obj?._API_URL_;")
            .unwrap();
        assert_eq!(out, r#"config._ENV_ = "production"; obj?._API_URL_;"#);

        let out = table.substitute(Path::new("a.js"), "[..._LANGS_]").unwrap();
        assert!(out.starts_with(r#"[...[["en-US","English"]"#), "{out}");
    }

    #[test]
    fn test_unresolved_token_is_an_error() {
        let table = DefineTable::from_context(&context(), &IndexMap::new()).unwrap();
        let err = table
            .substitute(Path::new("src/init.ts"), "fetch(_API_URL_)")
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnresolvedConstant { ref token, .. } if token == "_API_URL_"
        ));
    }

    #[test]
    fn test_user_constants() {
        let mut extra = IndexMap::new();
        extra.insert("_API_URL_".to_owned(), Value::from("https://example.test"));
        extra.insert("_DEBUG_".to_owned(), Value::Bool(false));
        let table = DefineTable::from_context(&context(), &extra).unwrap();

        let out = table
            .substitute(Path::new("a.js"), "f(_API_URL_, _DEBUG_)")
            .unwrap();
        assert_eq!(out, r#"f("https://example.test", false)"#);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_user_constant_cannot_shadow_builtin() {
        let mut extra = IndexMap::new();
        extra.insert(VERSION_TOKEN.to_owned(), Value::from("x"));
        assert!(matches!(
            DefineTable::from_context(&context(), &extra),
            Err(PipelineError::InvalidConstant { .. })
        ));
    }

    #[test]
    fn test_user_constant_name_shape() {
        let mut extra = IndexMap::new();
        extra.insert("process.env.API".to_owned(), Value::from("x"));
        assert!(DefineTable::from_context(&context(), &extra).is_err());
        assert!(is_constant_token("_A_"));
        assert!(!is_constant_token("x_A_"));
    }
}
