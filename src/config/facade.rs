//! Configuration loading entry point.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

use super::sources::{global_file, workspace_file};
use super::{GenloopConfig, ValidationError};
use crate::error::GenError;

/// Loads and validates [`GenloopConfig`].
///
/// Sources, lowest precedence first:
/// 1. Built-in defaults
/// 2. Global file (`$XDG_CONFIG_HOME/genloop/config.toml`)
/// 3. Workspace files (`config/config.toml`, `config/{GENLOOP_ENV}.toml`)
/// 4. Explicit `--config` file
/// 5. `GENLOOP__SECTION__KEY` environment variables
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(workspace_root: &Path, explicit: Option<&Path>) -> Result<GenloopConfig, GenError> {
        let mut builder = global_file::add_to_builder(Config::builder());
        builder = workspace_file::add_to_builder(builder, workspace_root);
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(GenError::ConfigError(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("GENLOOP")
                .separator("__")
                .try_parsing(true),
        );

        let config: GenloopConfig = builder.build()?.try_deserialize()?;
        Self::validated(config)
    }

    /// Load a single file with no other layers.
    pub fn load_from_file(path: &Path) -> Result<GenloopConfig, GenError> {
        let config: GenloopConfig = Config::builder()
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        Self::validated(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    fn validated(config: GenloopConfig) -> Result<GenloopConfig, GenError> {
        config.validate().map_err(join_errors)?;
        Ok(config)
    }
}

pub(crate) fn join_errors(errors: Vec<ValidationError>) -> GenError {
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    GenError::ConfigError(format!("Invalid configuration: {}", joined))
}
