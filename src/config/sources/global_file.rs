//! Global config file source: $XDG_CONFIG_HOME/genloop/config.toml or ~/.config/genloop/config.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::File;
use std::path::PathBuf;
use tracing::debug;

/// Path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
    };
    Some(base.join("genloop").join("config.toml"))
}

/// Add the global config file to `builder` when it exists.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    match global_config_path() {
        Some(path) if path.exists() => {
            let path = path.canonicalize().unwrap_or(path);
            builder.add_source(File::from(path).required(false))
        }
        Some(path) => {
            debug!(config_path = %path.display(), "no global configuration file");
            builder
        }
        None => builder,
    }
}
