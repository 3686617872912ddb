//! Configuration System
//!
//! Layered configuration: built-in defaults, the global file, workspace files,
//! an explicit `--config` file, then `GENLOOP__*` environment variables.
//! Validation collects every problem instead of stopping at the first.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::backend::BackendConfig;
use crate::ledger::CostLimits;
use crate::limiter::{Credential, LimiterConfig};
use crate::logging::LoggingConfig;
use crate::notify::NotifyConfig;
use crate::orchestrator::LoopPolicy;
use crate::request::PromptTemplate;
use crate::types::Pricing;

mod facade;
mod sources;

pub use facade::ConfigLoader;
pub(crate) use facade::join_errors;

/// Record store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Sled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where session, ledger and counter records live. Defaults to the
    /// platform data directory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub backend: StorageBackend,

    /// Generated images. Defaults to `output/images` under the workspace.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the state directory; relative paths hang off `workspace_root`.
    pub fn resolve_state_dir(&self, workspace_root: &Path) -> PathBuf {
        match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace_root.join(dir),
            None => directories::ProjectDirs::from("", "", "genloop")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| workspace_root.join(".genloop")),
        }
    }

    pub fn resolve_output_dir(&self, workspace_root: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace_root.join(dir),
            None => workspace_root.join("output").join("images"),
        }
    }
}

/// One configured credential. The secret is inline or read from an
/// environment variable.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub id: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub secret_env: Option<String>,
    #[serde(default)]
    pub daily_cap: Option<u32>,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("id", &self.id)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("secret_env", &self.secret_env)
            .field("daily_cap", &self.daily_cap)
            .finish()
    }
}

impl CredentialConfig {
    pub fn resolve(&self) -> Result<Credential, String> {
        let secret = match (&self.secret, &self.secret_env) {
            (Some(secret), _) if !secret.is_empty() => secret.clone(),
            (_, Some(var)) => std::env::var(var)
                .map_err(|_| format!("environment variable {} is not set", var))?,
            _ => return Err("no secret or secret_env given".to_string()),
        };
        Ok(Credential {
            id: self.id.clone(),
            secret,
            daily_cap: self.daily_cap,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Prompt template with `{field}` placeholders filled from each payload.
    #[serde(default)]
    pub prompt_template: Option<String>,
}

/// Defaults applied to new sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default)]
    pub max_duration_hours: f64,
    #[serde(default)]
    pub session_cost_cap: Option<f64>,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenloopConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default)]
    pub limits: CostLimits,
    #[serde(default)]
    pub policy: LoopPolicy,
    #[serde(default)]
    pub session: SessionDefaults,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Credential(String, String),
    Section(&'static str, String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Credential(id, msg) => write!(f, "Credential '{}': {}", id, msg),
            ValidationError::Section(section, msg) => write!(f, "[{}]: {}", section, msg),
        }
    }
}

impl std::error::Error for ValidationError {}

fn check_cap(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(format!("{} must be a finite number", name))
    }
}

impl GenloopConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.pricing.validate() {
            errors.push(ValidationError::Section("pricing", e));
        }
        if let Err(e) = self.policy.validate() {
            errors.push(ValidationError::Section("policy", e));
        }
        if let Err(e) = crate::logging::validate(&self.logging) {
            errors.push(ValidationError::Section("logging", e));
        }
        if self.limiter.recover_every == 0 {
            errors.push(ValidationError::Section(
                "limiter",
                "recover_every must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("daily_cost_cap", self.limits.daily_cost_cap),
            ("monthly_cost_cap", self.limits.monthly_cost_cap),
        ] {
            if let Err(e) = check_cap(name, value) {
                errors.push(ValidationError::Section("limits", e));
            }
        }
        if let Some(template) = &self.request.prompt_template {
            if let Err(e) = PromptTemplate::parse(template) {
                errors.push(ValidationError::Section("request", format!("prompt_template: {}", e)));
            }
        }

        let mut seen = HashSet::new();
        for credential in &self.credentials {
            if credential.id.trim().is_empty() {
                errors.push(ValidationError::Credential(
                    credential.id.clone(),
                    "id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(credential.id.as_str()) {
                errors.push(ValidationError::Credential(
                    credential.id.clone(),
                    "duplicate id".to_string(),
                ));
            }
            if credential.secret.as_deref().map_or(true, str::is_empty)
                && credential.secret_env.is_none()
            {
                errors.push(ValidationError::Credential(
                    credential.id.clone(),
                    "no secret or secret_env given".to_string(),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Resolve every credential, failing if none are usable.
    pub fn resolve_credentials(&self) -> Result<Vec<Credential>, Vec<ValidationError>> {
        let mut resolved = Vec::new();
        let mut errors = Vec::new();
        for credential in &self.credentials {
            match credential.resolve() {
                Ok(c) => resolved.push(c),
                Err(e) => errors.push(ValidationError::Credential(credential.id.clone(), e)),
            }
        }
        if resolved.is_empty() && errors.is_empty() {
            errors.push(ValidationError::Section(
                "credentials",
                "no credentials configured".to_string(),
            ));
        }
        if errors.is_empty() {
            Ok(resolved)
        } else {
            Err(errors)
        }
    }

    /// Copy safe to print: secrets and webhook URLs masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for credential in &mut copy.credentials {
            if credential.secret.is_some() {
                credential.secret = Some("<redacted>".to_string());
            }
        }
        if copy.notify.webhook_url.is_some() {
            copy.notify.webhook_url = Some("<redacted>".to_string());
        }
        copy
    }
}
