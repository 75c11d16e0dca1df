//! Build context resolved once per build
//!
//! Everything a stage or the constant injector may want to know about the
//! environment is captured here up front. Nothing downstream reads the live
//! process environment.

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{config::Config, types::BuildMode};

/// Metadata for one locale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleMeta {
    /// Human readable language name, e.g. `日本語`
    #[serde(default)]
    pub lang: Option<String>,
}

impl LocaleMeta {
    pub fn named(lang: impl Into<String>) -> Self {
        Self {
            lang: Some(lang.into()),
        }
    }
}

/// Immutable configuration of a single build
#[derive(Debug, Clone)]
pub struct BuildContext {
    mode: BuildMode,
    env: IndexMap<String, String>,
    version: String,
    locales: IndexMap<String, LocaleMeta>,
}

impl BuildContext {
    pub fn new(mode: BuildMode, version: impl Into<String>) -> Self {
        Self {
            mode,
            env: IndexMap::new(),
            version: version.into(),
            locales: IndexMap::new(),
        }
    }

    /// Resolve the context from the configuration and an environment snapshot
    ///
    /// Mode precedence: `mode_override` (the CLI), then `mode` from the config,
    /// then the environment variable named by `mode_env`.
    pub fn resolve<I, K, V>(config: &Config, env: I, mode_override: Option<BuildMode>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env: IndexMap<String, String> = env
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();

        let mode = mode_override.or(config.mode).unwrap_or_else(|| {
            env.get(&config.mode_env)
                .map_or(BuildMode::Development, |value| {
                    BuildMode::from_env_value(value)
                })
        });

        debug!(
            "Resolved build context: mode={mode}, version={}, {} locale(s), {} env var(s)",
            config.version,
            config.locales.len(),
            env.len()
        );

        Self {
            mode,
            env,
            version: config.version.clone(),
            locales: config.locales.clone(),
        }
    }

    #[must_use]
    pub fn with_locales(mut self, locales: IndexMap<String, LocaleMeta>) -> Self {
        self.locales = locales;
        self
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn is_production(&self) -> bool {
        self.mode.is_production()
    }

    pub fn env(&self) -> &IndexMap<String, String> {
        &self.env
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn locales(&self) -> &IndexMap<String, LocaleMeta> {
        &self.locales
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config {
            version: "12.3.0".to_owned(),
            ..Config::default()
        };
        config
            .locales
            .insert("en-US".to_owned(), LocaleMeta::named("English"));
        config
    }

    #[test]
    fn test_mode_from_environment() {
        let cx = BuildContext::resolve(&config(), [("NODE_ENV", "production")], None);
        assert_eq!(cx.mode(), BuildMode::Production);
        assert_eq!(cx.version(), "12.3.0");
        assert_eq!(cx.env_var("NODE_ENV"), Some("production"));

        let cx = BuildContext::resolve(&config(), [("NODE_ENV", "test")], None);
        assert_eq!(cx.mode(), BuildMode::Development);
    }

    #[test]
    fn test_missing_mode_variable_means_development() {
        let cx = BuildContext::resolve(&config(), Vec::<(String, String)>::new(), None);
        assert!(!cx.is_production());
    }

    #[test]
    fn test_custom_mode_variable() {
        let config = Config {
            mode_env: "APP_MODE".to_owned(),
            ..config()
        };
        let cx = BuildContext::resolve(
            &config,
            [("NODE_ENV", "development"), ("APP_MODE", "production")],
            None,
        );
        assert!(cx.is_production());
    }

    #[test]
    fn test_override_beats_config_and_environment() {
        let config = Config {
            mode: Some(BuildMode::Production),
            ..config()
        };
        let cx = BuildContext::resolve(&config, [("NODE_ENV", "production")], None);
        assert!(cx.is_production());

        let cx = BuildContext::resolve(
            &config,
            [("NODE_ENV", "production")],
            Some(BuildMode::Development),
        );
        assert!(!cx.is_production());
    }

    #[test]
    fn test_locales_are_copied_in_order() {
        let mut config = config();
        config
            .locales
            .insert("ja-JP".to_owned(), LocaleMeta::named("日本語"));
        let cx = BuildContext::resolve(&config, [("NODE_ENV", "production")], None);
        let codes: Vec<_> = cx.locales().keys().map(String::as_str).collect();
        assert_eq!(codes, vec!["en-US", "ja-JP"]);
    }
}
