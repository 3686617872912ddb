//! Workspace config file source: config/config.toml and config/{env}.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::File;
use std::path::Path;

/// Add workspace config files to `builder`.
/// Precedence: config/config.toml (base) then config/{GENLOOP_ENV}.toml.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> ConfigBuilder<DefaultState> {
    let config_dir = workspace_root.join("config");
    let env_name = std::env::var("GENLOOP_ENV").unwrap_or_else(|_| "development".to_string());

    [
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ]
    .into_iter()
    .filter(|path| path.exists())
    .fold(builder, |builder, path| {
        builder.add_source(File::from(path).required(false))
    })
}
