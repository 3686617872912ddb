//! Shared fixtures: scripted backend, recording notifier, in-memory sink and
//! a harness wiring them to a pool, ledger and session store.

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use genloop::backend::{BackendError, GeneratedImage, GenerationBackend, GenerationRequest};
use genloop::clock::ManualClock;
use genloop::error::StorageError;
use genloop::ledger::{CostLedger, CostLimits};
use genloop::limiter::{Credential, CredentialPool, LimiterConfig, Lease};
use genloop::notify::{Notifier, NotifyEvent};
use genloop::orchestrator::{GenerationLoop, LoopDeps, LoopPolicy, RunReport};
use genloop::request::PayloadRequestBuilder;
use genloop::session::{SessionSettings, SessionStore};
use genloop::sink::ImageSink;
use genloop::store::{MemoryRecordStore, SharedStore};
use genloop::types::{Pricing, Tier};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tempfile::TempDir;
use tokio::sync::watch;

/// Serializes tests that touch HOME or XDG variables.
static XDG_ENV_MUTEX: StdMutex<()> = StdMutex::new(());

/// Point XDG_CONFIG_HOME and XDG_DATA_HOME at `test_dir` while `f` runs.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = XDG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<_> = ["XDG_CONFIG_HOME", "XDG_DATA_HOME"]
        .iter()
        .map(|k| (*k, std::env::var(k).ok()))
        .collect();

    std::env::set_var("XDG_CONFIG_HOME", test_dir.path());
    std::env::set_var("XDG_DATA_HOME", test_dir.path().join("data"));
    let result = f();

    for (key, value) in saved {
        match value {
            Some(v) => std::env::set_var(key, v),
            None => std::env::remove_var(key),
        }
    }
    result
}

pub fn start_time() -> chrono::DateTime<Local> {
    Local.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
}

/// Backend reply for one call.
#[derive(Debug, Clone)]
pub enum Step {
    Image,
    Quota,
    Overload,
    Fail(&'static str),
}

/// Replays `script` in order, then `fallback_step` forever.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Step>>,
    fallback_step: Step,
    pub calls: Mutex<Vec<(String, Tier)>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Step>, fallback_step: Step) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback_step,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_log(&self) -> Vec<(String, Tier)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        lease: &Lease,
        _request: &GenerationRequest,
    ) -> Result<GeneratedImage, BackendError> {
        self.calls
            .lock()
            .push((lease.credential_id.clone(), lease.tier));
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback_step.clone());
        match step {
            Step::Image => Ok(GeneratedImage {
                mime_type: "image/png".to_string(),
                data: vec![0x89, b'P', b'N', b'G'],
            }),
            Step::Quota => Err(BackendError::QuotaExceeded("RESOURCE_EXHAUSTED".to_string())),
            Step::Overload => Err(BackendError::Overload("UNAVAILABLE".to_string())),
            Step::Fail(message) => Err(BackendError::Other(message.to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(NotifyEvent::kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotifyEvent) {
        self.events.lock().push(event.clone());
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub stored: Mutex<Vec<String>>,
}

impl ImageSink for MemorySink {
    fn store(&self, item_id: &str, _image: &GeneratedImage) -> Result<PathBuf, StorageError> {
        self.stored.lock().push(item_id.to_string());
        Ok(PathBuf::from(format!("{}.png", item_id)))
    }
}

/// Limiter settings with no spacing between calls.
pub fn fast_limiter() -> LimiterConfig {
    LimiterConfig {
        min_interval_secs: 0,
        poll_interval_ms: 1,
        ..LimiterConfig::default()
    }
}

pub struct Harness {
    pub store: SharedStore,
    pub clock: ManualClock,
    pub backend: Arc<ScriptedBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub sink: Arc<MemorySink>,
    pub pool: Arc<CredentialPool>,
    pub ledger: Arc<CostLedger>,
    pub sessions: Arc<SessionStore>,
    pub policy: LoopPolicy,
}

impl Harness {
    pub fn new(
        credential_ids: &[&str],
        limiter: LimiterConfig,
        limits: CostLimits,
        backend: ScriptedBackend,
    ) -> Self {
        let store: SharedStore = Arc::new(MemoryRecordStore::new());
        let clock = ManualClock::new(start_time());
        let credentials = credential_ids
            .iter()
            .map(|id| Credential::new(*id, format!("secret-{}", id)))
            .collect();
        let pool = CredentialPool::new(credentials, limiter, store.clone(), Arc::new(clock.clone()))
            .unwrap();
        Self {
            ledger: Arc::new(CostLedger::new(store.clone(), Arc::new(clock.clone()), limits)),
            sessions: Arc::new(SessionStore::new(store.clone(), Arc::new(clock.clone()))),
            pool: Arc::new(pool),
            backend: Arc::new(backend),
            notifier: Arc::new(RecordingNotifier::default()),
            sink: Arc::new(MemorySink::default()),
            policy: LoopPolicy::immediate(),
            store,
            clock,
        }
    }

    /// Create the active session over `count` prompt payloads.
    pub fn create_session(&self, count: usize, settings: SessionSettings) {
        let payloads = (1..=count)
            .map(|n| json!({ "prompt": format!("scene {}", n) }))
            .collect();
        self.sessions.create(payloads, settings).unwrap();
    }

    pub fn deps(&self) -> LoopDeps {
        LoopDeps {
            pool: self.pool.clone(),
            ledger: self.ledger.clone(),
            sessions: self.sessions.clone(),
            backend: self.backend.clone(),
            requests: Arc::new(PayloadRequestBuilder::new(None)),
            sink: self.sink.clone(),
            notifier: self.notifier.clone(),
            clock: Arc::new(self.clock.clone()),
            pricing: Pricing::default(),
            policy: self.policy.clone(),
        }
    }

    pub async fn run(&self) -> RunReport {
        let (_tx, rx) = watch::channel(false);
        GenerationLoop::new(self.deps(), rx).run().await.unwrap()
    }
}
