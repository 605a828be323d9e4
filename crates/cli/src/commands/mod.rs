pub mod chat;
pub mod config_cmd;
pub mod domain;

use lorekeep_config::{AppConfig, ConfigError};
use std::path::{Path, PathBuf};

/// Load from `path` when given, else from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
}

/// The domain file to use: the explicit one, or the one the config names.
pub fn domain_path(config: &AppConfig, explicit: Option<PathBuf>) -> Result<PathBuf, String> {
    explicit
        .or_else(|| config.domain_file.as_ref().map(PathBuf::from))
        .ok_or_else(|| {
            "No domain file given. Pass --domain <file> or set `domain_file` in the config.".to_string()
        })
}
