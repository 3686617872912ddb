//! CLI route: single route table and run context. Builds the collaborators
//! once and hands them to the domain services and presentation.

use serde_json::{json, Value};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::backend::HttpImageBackend;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{join_errors, ConfigLoader, GenloopConfig, StorageBackend};
use crate::error::{GenError, SessionError};
use crate::ledger::CostLedger;
use crate::limiter::CredentialPool;
use crate::notify;
use crate::orchestrator::{GenerationLoop, LoopDeps};
use crate::request::PayloadRequestBuilder;
use crate::session::{
    ProcessLock, ResumeCheck, SessionSettings, SessionState, SessionStore, LOCK_FILE_NAME,
};
use crate::sink::DirectorySink;
use crate::store::{FileRecordStore, SharedStore, SledRecordStore};

use crate::cli::parse::{
    Commands, ConfigCommands, LimitsCommands, OutputFormat, RunArgs, SessionCommands,
};
use crate::cli::presentation::{
    format_limits_text, format_run_report, format_session_list_json, format_session_list_text,
    format_status_json, format_status_text, StatusView,
};

/// Runtime context for CLI execution: workspace, effective configuration and
/// the durable record store.
pub struct RunContext {
    workspace_root: PathBuf,
    config: GenloopConfig,
    state_dir: PathBuf,
    store: SharedStore,
    clock: SharedClock,
}

/// Open the record store selected by `storage.backend` under `state_dir`.
pub fn open_store(config: &GenloopConfig, state_dir: &Path) -> Result<SharedStore, GenError> {
    let store: SharedStore = match config.storage.backend {
        StorageBackend::File => Arc::new(FileRecordStore::new(state_dir.join("records"))?),
        StorageBackend::Sled => Arc::new(SledRecordStore::new(state_dir.join("db"))?),
    };
    Ok(store)
}

impl RunContext {
    /// Load configuration for `workspace_root` and open the record store.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, GenError> {
        let config = ConfigLoader::load(&workspace_root, config_path.as_deref())?;
        let state_dir = config.storage.resolve_state_dir(&workspace_root);
        std::fs::create_dir_all(&state_dir).map_err(|e| {
            GenError::ConfigError(format!(
                "Cannot create state directory {}: {}",
                state_dir.display(),
                e
            ))
        })?;
        let store = open_store(&config, &state_dir)?;
        Ok(Self::with_parts(
            workspace_root,
            config,
            state_dir,
            store,
            Arc::new(SystemClock),
        ))
    }

    /// Assemble a context from prepared parts.
    pub fn with_parts(
        workspace_root: PathBuf,
        config: GenloopConfig,
        state_dir: PathBuf,
        store: SharedStore,
        clock: SharedClock,
    ) -> Self {
        Self {
            workspace_root,
            config,
            state_dir,
            store,
            clock,
        }
    }

    pub fn config(&self) -> &GenloopConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(
        &self,
        command: &Commands,
        shutdown: watch::Receiver<bool>,
    ) -> Result<String, GenError> {
        match command {
            Commands::Run(args) => self.handle_run(args, shutdown).await,
            Commands::Status { format } => self.handle_status(*format),
            Commands::Limits { command } => self.handle_limits(command),
            Commands::Session { command } => self.handle_session(command),
            Commands::Config { command } => self.handle_config(command),
        }
    }

    fn ledger(&self) -> CostLedger {
        CostLedger::new(self.store.clone(), self.clock.clone(), self.config.limits)
    }

    fn sessions(&self) -> SessionStore {
        SessionStore::new(self.store.clone(), self.clock.clone())
    }

    fn lock(&self) -> Result<ProcessLock, GenError> {
        Ok(ProcessLock::acquire(self.state_dir.join(LOCK_FILE_NAME))?)
    }

    async fn handle_run(
        &self,
        args: &RunArgs,
        shutdown: watch::Receiver<bool>,
    ) -> Result<String, GenError> {
        let _lock = self.lock()?;

        // Everything that can be misconfigured is checked before any session
        // record is touched.
        let credentials = self.config.resolve_credentials().map_err(join_errors)?;
        let requests = PayloadRequestBuilder::from_template_source(
            self.config.request.prompt_template.as_deref(),
        )
        .map_err(|e| GenError::ConfigError(format!("prompt_template: {}", e)))?;
        let backend = HttpImageBackend::new(self.config.backend.clone())?;
        let notifier = notify::from_config(&self.config.notify)
            .map_err(|e| GenError::ConfigError(format!("notifier: {}", e)))?;

        let sessions = Arc::new(self.sessions());
        self.prepare_session(&sessions, args)?;

        let pool = CredentialPool::new(
            credentials,
            self.config.limiter.clone(),
            self.store.clone(),
            self.clock.clone(),
        )?;
        let deps = LoopDeps {
            pool: Arc::new(pool),
            ledger: Arc::new(self.ledger()),
            sessions,
            backend: Arc::new(backend),
            requests: Arc::new(requests),
            sink: Arc::new(DirectorySink::new(
                self.config.storage.resolve_output_dir(&self.workspace_root),
            )),
            notifier: notifier.clone(),
            clock: self.clock.clone(),
            pricing: self.config.pricing,
            policy: self.config.policy.clone(),
        };

        let result = GenerationLoop::new(deps, shutdown).run().await;
        notifier.flush().await;
        Ok(format_run_report(&result?))
    }

    /// Resume, discard or create so that exactly one session is active.
    fn prepare_session(&self, sessions: &SessionStore, args: &RunArgs) -> Result<(), GenError> {
        match sessions.check_for_resume()? {
            ResumeCheck::Resumable(state) => {
                let resume = if args.resume {
                    true
                } else if args.discard {
                    false
                } else {
                    confirm_resume(&state)?
                };
                if resume {
                    info!(
                        session_id = %state.session_id,
                        pending = state.pending_count(),
                        "resuming interrupted session"
                    );
                    return Ok(());
                }
                sessions.discard()?;
            }
            ResumeCheck::ClearedStale { session_id } => {
                warn!(session_id = %session_id, "cleared stale active session");
            }
            ResumeCheck::ArchivedComplete { session_id } => {
                info!(session_id = %session_id, "previous session was already complete");
            }
            ResumeCheck::Fresh => {}
        }

        let payloads = match &args.input {
            Some(path) => read_payloads(path)?,
            None => default_payloads(args.count)?,
        };
        let settings = SessionSettings {
            target_count: args.count,
            max_duration_hours: args
                .max_hours
                .unwrap_or(self.config.session.max_duration_hours),
            session_cost_cap: args.session_cap.or(self.config.session.session_cost_cap),
            batch: args.batch,
        };
        sessions.create(payloads, settings)?;
        Ok(())
    }

    fn handle_status(&self, format: OutputFormat) -> Result<String, GenError> {
        // Status works without usable credentials; the table is simply empty.
        let credentials = self.config.resolve_credentials().unwrap_or_default();
        let pool = CredentialPool::new(
            credentials,
            self.config.limiter.clone(),
            self.store.clone(),
            self.clock.clone(),
        )?;
        let view = StatusView {
            summary: self.ledger().summary()?,
            session: self.sessions().current()?,
            credentials: pool.snapshot(),
        };
        match format {
            OutputFormat::Text => Ok(format_status_text(&view)),
            OutputFormat::Json => format_status_json(&view),
        }
    }

    fn handle_limits(&self, command: &LimitsCommands) -> Result<String, GenError> {
        let ledger = self.ledger();
        match command {
            LimitsCommands::Show => {}
            LimitsCommands::Set { daily, monthly } => {
                for value in daily.iter().chain(monthly.iter()) {
                    if !value.is_finite() || *value < 0.0 {
                        return Err(GenError::InputError(format!(
                            "cost cap must be a non-negative number, got {}",
                            value
                        )));
                    }
                }
                // A running session writes the same ledger record.
                let _lock = self.lock()?;
                ledger.set_limits(*daily, *monthly)?;
            }
        }
        Ok(format_limits_text(&ledger.summary()?))
    }

    fn handle_session(&self, command: &SessionCommands) -> Result<String, GenError> {
        let sessions = self.sessions();
        match command {
            SessionCommands::Discard => {
                let _lock = self.lock()?;
                match sessions.discard() {
                    Ok(state) => Ok(format!(
                        "Discarded session {} ({} pending items archived)",
                        state.session_id,
                        state.pending_count()
                    )),
                    Err(SessionError::NoActiveSession) => {
                        Ok("No active session to discard.".to_string())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            SessionCommands::List { format } => {
                let archives = sessions.list_archives()?;
                match format {
                    OutputFormat::Text => Ok(format_session_list_text(&archives)),
                    OutputFormat::Json => format_session_list_json(&archives),
                }
            }
        }
    }

    fn handle_config(&self, command: &ConfigCommands) -> Result<String, GenError> {
        match command {
            ConfigCommands::Show => toml::to_string_pretty(&self.config.redacted())
                .map_err(|e| GenError::ConfigError(format!("Failed to render config: {}", e))),
        }
    }
}

/// Ask whether to continue an interrupted session. Requires a terminal.
fn confirm_resume(state: &SessionState) -> Result<bool, GenError> {
    if !std::io::stdin().is_terminal() {
        return Err(GenError::InputError(format!(
            "interrupted session {} has {} pending items; pass --resume or --discard",
            state.session_id,
            state.pending_count()
        )));
    }
    use dialoguer::Confirm;
    Confirm::new()
        .with_prompt(format!(
            "Resume session {} ({} done, {} pending)?",
            state.session_id,
            state.done_count(),
            state.pending_count()
        ))
        .default(true)
        .interact()
        .map_err(|e| GenError::InputError(format!("Failed to get user input: {}", e)))
}

/// Parse work item payloads: a JSON array, or one JSON value per line.
pub fn read_payloads(path: &Path) -> Result<Vec<Value>, GenError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| GenError::InputError(format!("Cannot read {}: {}", path.display(), e)))?;
    let trimmed = contents.trim_start();
    let payloads = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<Value>>(trimmed)
            .map_err(|e| GenError::InputError(format!("{}: {}", path.display(), e)))?
    } else {
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    GenError::InputError(format!("{} line {}: {}", path.display(), n + 1, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    if payloads.is_empty() {
        return Err(GenError::InputError(format!(
            "{} contains no work items",
            path.display()
        )));
    }
    Ok(payloads)
}

/// `count` payloads carrying only their 1-based index.
pub fn default_payloads(count: i64) -> Result<Vec<Value>, GenError> {
    if count <= 0 {
        return Err(GenError::InputError(
            "a positive count is required without --input".to_string(),
        ));
    }
    Ok((1..=count).map(|index| json!({ "index": index })).collect())
}
