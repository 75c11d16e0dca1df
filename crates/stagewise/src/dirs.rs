//! Platform directories used by stagewise

use std::path::PathBuf;

use etcetera::{BaseStrategy, choose_base_strategy};

/// Per-user configuration directory, e.g. `~/.config/stagewise`
pub fn user_config_dir() -> Option<PathBuf> {
    choose_base_strategy()
        .ok()
        .map(|strategy| strategy.config_dir().join("stagewise"))
}

/// Per-user fallback configuration file, if it exists
pub fn user_config_file() -> Option<PathBuf> {
    user_config_dir()
        .map(|dir| dir.join(crate::config::CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}
