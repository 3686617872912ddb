//! Configuration loading through the CLI run context.

use crate::integration::support::with_xdg_env;
use genloop::cli::{Commands, LimitsCommands, OutputFormat, RunContext};
use genloop::config::{ConfigLoader, StorageBackend};
use std::fs;
use tempfile::TempDir;
use tokio::sync::watch;

const WORKSPACE_CONFIG: &str = r#"
[storage]
state_dir = "state"
backend = "sled"

[limits]
daily_cost_cap = 12.5

[[credentials]]
id = "key-a"
secret = "inline-secret"
daily_cap = 5
"#;

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::write(dir.path().join("config/config.toml"), WORKSPACE_CONFIG).unwrap();
    dir
}

#[test]
fn workspace_file_selects_storage_and_limits() {
    let xdg = TempDir::new().unwrap();
    let ws = workspace();
    let config = with_xdg_env(&xdg, || ConfigLoader::load(ws.path(), None)).unwrap();

    assert_eq!(config.storage.backend, StorageBackend::Sled);
    assert_eq!(config.limits.daily_cost_cap, 12.5);
    assert_eq!(config.credentials[0].daily_cap, Some(5));
    assert_eq!(
        config.storage.resolve_state_dir(ws.path()),
        ws.path().join("state")
    );
}

#[test]
fn invalid_workspace_file_is_a_configuration_error() {
    let xdg = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    fs::create_dir_all(ws.path().join("config")).unwrap();
    fs::write(
        ws.path().join("config/config.toml"),
        "[request]\nprompt_template = \"{}\"\n",
    )
    .unwrap();

    let err = with_xdg_env(&xdg, || ConfigLoader::load(ws.path(), None)).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("prompt_template"));
}

#[tokio::test]
async fn run_context_reports_status_from_configured_store() {
    let xdg = TempDir::new().unwrap();
    let ws = workspace();
    let context = with_xdg_env(&xdg, || RunContext::new(ws.path().to_path_buf(), None)).unwrap();
    assert!(ws.path().join("state/db").exists());

    let (_tx, rx) = watch::channel(false);
    let out = context
        .execute(
            &Commands::Limits {
                command: LimitsCommands::Set {
                    daily: None,
                    monthly: Some(99.0),
                },
            },
            rx.clone(),
        )
        .await
        .unwrap();
    assert!(out.contains("99.00"));

    let status = context
        .execute(
            &Commands::Status {
                format: OutputFormat::Json,
            },
            rx,
        )
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&status).unwrap();
    assert_eq!(parsed["cost"]["limits"]["daily_cost_cap"], 12.5);
    assert_eq!(parsed["credentials"][0]["id"], "key-a");
    assert_eq!(parsed["credentials"][0]["daily_cap"], 5);
}
