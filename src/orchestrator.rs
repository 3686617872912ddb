//! Generation Loop
//!
//! Drives the pool, ledger, session store and collaborators through a
//! sequential pull, evaluate, dispatch, record cycle. Each item is
//! checkpointed before the next one starts, so an interrupted run resumes
//! without redoing finished work or double-counting spend.

pub mod policy;

pub use policy::{LoopPolicy, OverheadScope};

use chrono::{DateTime, Local};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, GenerationBackend};
use crate::clock::SharedClock;
use crate::error::{GenError, SessionError};
use crate::ledger::CostLedger;
use crate::limiter::{CredentialPool, Lease};
use crate::notify::{Notifier, NotifyEvent};
use crate::request::RequestBuilder;
use crate::session::{ItemStatus, Progress, SessionState, SessionStore, WorkItem};
use crate::sink::ImageSink;
use crate::stop::{evaluate, HaltReason, StopDecision, StopInputs};
use crate::types::{Pricing, Tier};

/// Everything the loop drives. Constructed once by the caller.
#[derive(Clone)]
pub struct LoopDeps {
    pub pool: Arc<CredentialPool>,
    pub ledger: Arc<CostLedger>,
    pub sessions: Arc<SessionStore>,
    pub backend: Arc<dyn GenerationBackend>,
    pub requests: Arc<dyn RequestBuilder>,
    pub sink: Arc<dyn ImageSink>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: SharedClock,
    pub pricing: Pricing,
    pub policy: LoopPolicy,
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Generated { tier: Tier, cost: f64 },
    /// `billed` is set when a call succeeded remotely but the result was lost.
    Failed {
        error: String,
        billed: Option<(Tier, f64)>,
    },
    /// No credential could be acquired; the item stays pending.
    NoSlot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Idle,
    FetchNext,
    Evaluate(WorkItem),
    Dispatch(WorkItem),
    Record(WorkItem, DispatchOutcome),
    Waiting,
    Stopped(HaltReason),
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::FetchNext => "fetch_next",
            LoopState::Evaluate(_) => "evaluate",
            LoopState::Dispatch(_) => "dispatch",
            LoopState::Record(_, _) => "record",
            LoopState::Waiting => "waiting",
            LoopState::Stopped(_) => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The session was closed and archived with this reason.
    Halted(HaltReason),
    /// Shutdown was requested; the session remains active and resumable.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: String,
    pub outcome: RunOutcome,
    pub progress: Progress,
    /// External calls issued during this run.
    pub calls: u64,
    /// Items attempted during this run.
    pub attempts: u64,
}

pub struct GenerationLoop {
    deps: LoopDeps,
    shutdown: watch::Receiver<bool>,
    run_started: DateTime<Local>,
    last_report: DateTime<Local>,
    attempts: u64,
    consecutive_failures: u32,
    last_error: String,
}

impl GenerationLoop {
    pub fn new(deps: LoopDeps, shutdown: watch::Receiver<bool>) -> Self {
        let now = deps.clock.now();
        Self {
            deps,
            shutdown,
            run_started: now,
            last_report: now,
            attempts: 0,
            consecutive_failures: 0,
            last_error: String::new(),
        }
    }

    fn interrupted(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn current_session(&self) -> Result<SessionState, GenError> {
        self.deps
            .sessions
            .current()?
            .ok_or(GenError::SessionError(SessionError::NoActiveSession))
    }

    /// Run the active session until it halts or shutdown is requested.
    pub async fn run(&mut self) -> Result<RunReport, GenError> {
        let session = self.current_session()?;
        self.deps.pool.begin_session_accounting();
        self.run_started = self.deps.clock.now();
        self.last_report = self.run_started;
        info!(
            session_id = %session.session_id,
            pending = session.pending_count(),
            batch = session.settings.batch,
            "generation loop started"
        );

        let mut state = match self.preflight(&session)? {
            Some(halt) => LoopState::Stopped(halt),
            None => LoopState::Idle,
        };

        loop {
            debug!(state = state.name(), "loop state");
            state = match state {
                LoopState::Idle => LoopState::FetchNext,
                LoopState::FetchNext => {
                    if self.interrupted() {
                        return self.interrupt_report();
                    }
                    self.maybe_report()?;
                    match self.current_session()?.next_pending() {
                        Some(item) => LoopState::Evaluate(item.clone()),
                        None => LoopState::Stopped(HaltReason::Complete),
                    }
                }
                LoopState::Evaluate(item) => match self.evaluate()? {
                    StopDecision::Continue => LoopState::Dispatch(item),
                    StopDecision::Stop(reason) => {
                        if reason.is_cost_limit() {
                            self.notify_cost_limit(reason.to_string()).await?;
                        }
                        LoopState::Stopped(HaltReason::Stop(reason))
                    }
                },
                LoopState::Dispatch(item) => {
                    let outcome = self.dispatch(&item).await?;
                    LoopState::Record(item, outcome)
                }
                LoopState::Record(item, outcome) => self.record(&item, outcome).await?,
                LoopState::Waiting => {
                    if self.pause().await {
                        return self.interrupt_report();
                    }
                    LoopState::FetchNext
                }
                LoopState::Stopped(halt) => return self.finish(halt).await,
            };
        }
    }

    fn session_cost_cap(&self, session: &SessionState) -> Result<Option<f64>, GenError> {
        Ok(match session.settings.session_cost_cap {
            Some(cap) => Some(cap),
            None => self.deps.ledger.limits()?.session_cost_cap_default,
        })
    }

    /// Batch runs check the whole estimated spend against the caps up front.
    fn preflight(&self, session: &SessionState) -> Result<Option<HaltReason>, GenError> {
        if !session.settings.batch {
            return Ok(None);
        }
        let unit = self.deps.pricing.unit_cost(self.deps.pool.tier(), true);
        let estimated = unit * session.pending_count() as f64;
        let summary = self.deps.ledger.summary()?;
        let checks = [
            ("daily", summary.daily.total_cost, summary.limits.daily_cost_cap),
            ("monthly", summary.monthly.total_cost, summary.limits.monthly_cost_cap),
        ];
        for (period, spent, cap) in checks {
            if cap > 0.0 && spent + estimated > cap {
                warn!(estimated, spent, cap, period, "batch pre-check failed");
                return Ok(Some(HaltReason::PreCheck {
                    estimated,
                    cap,
                    period,
                }));
            }
        }
        info!(estimated, items = session.pending_count(), "batch pre-check passed");
        Ok(None)
    }

    fn evaluate(&self) -> Result<StopDecision, GenError> {
        let session = self.current_session()?;
        let summary = self.deps.ledger.summary()?;
        let elapsed = self.deps.clock.now() - self.run_started;
        let inputs = StopInputs {
            generated: session.progress.generated,
            target_count: session.settings.target_count,
            elapsed_secs: elapsed.num_milliseconds() as f64 / 1000.0,
            max_duration_hours: session.settings.max_duration_hours,
            session_cost: session.progress.session_cost,
            session_cost_cap: self.session_cost_cap(&session)?,
            daily_total: summary.daily.total_cost,
            daily_cap: summary.limits.daily_cost_cap,
            monthly_total: summary.monthly.total_cost,
            monthly_cap: summary.limits.monthly_cost_cap,
            all_exhausted: self.deps.pool.is_exhausted(),
            next_tier: self.deps.pool.tier(),
            batch: session.settings.batch,
        };
        Ok(evaluate(&inputs, &self.deps.pricing))
    }

    /// No slot under Primary degrades the tier; under Fallback it latches the
    /// exhausted condition for the next evaluation.
    async fn signal_exhaustion(&self) {
        if self.deps.pool.tier() == Tier::Primary {
            if self.deps.pool.degrade_tier() {
                self.deps
                    .notifier
                    .notify(&NotifyEvent::TierSwitch {
                        from: Tier::Primary,
                        to: Tier::Fallback,
                        reason: "no primary credential available".to_string(),
                    })
                    .await;
            }
        } else {
            self.deps.pool.mark_exhausted();
        }
    }

    async fn dispatch(&self, item: &WorkItem) -> Result<DispatchOutcome, GenError> {
        let request = match self.deps.requests.build(item) {
            Ok(request) => request,
            Err(e) => {
                return Ok(DispatchOutcome::Failed {
                    error: e.to_string(),
                    billed: None,
                })
            }
        };
        let batch = self.current_session()?.settings.batch;

        let Some(mut lease) = self.deps.pool.acquire(self.deps.policy.acquire_timeout()).await
        else {
            self.signal_exhaustion().await;
            return Ok(DispatchOutcome::NoSlot);
        };

        let max_retries = self.deps.policy.max_retries.max(1);
        for attempt in 1..=max_retries {
            self.deps.pool.mark_used(&lease.credential_id, lease.tier)?;
            match self.deps.backend.generate(&lease, &request).await {
                Ok(image) => {
                    let cost = self.deps.pricing.unit_cost(lease.tier, batch);
                    return Ok(match self.deps.sink.store(&item.id, &image) {
                        Ok(path) => {
                            debug!(item_id = %item.id, path = %path.display(), "image stored");
                            DispatchOutcome::Generated {
                                tier: lease.tier,
                                cost,
                            }
                        }
                        Err(e) => DispatchOutcome::Failed {
                            error: format!("save failed: {}", e),
                            billed: Some((lease.tier, cost)),
                        },
                    });
                }
                Err(BackendError::Overload(message)) => {
                    warn!(item_id = %item.id, credential = %lease.credential_id, "backend overloaded, not retrying");
                    return Ok(DispatchOutcome::Failed {
                        error: format!("overloaded: {}", message),
                        billed: None,
                    });
                }
                Err(BackendError::Other(message)) => {
                    return Ok(DispatchOutcome::Failed {
                        error: message,
                        billed: None,
                    });
                }
                Err(BackendError::QuotaExceeded(message)) => {
                    self.deps.pool.mark_rate_limited(&lease.credential_id)?;
                    if attempt == max_retries {
                        return Ok(DispatchOutcome::Failed {
                            error: format!("quota retries exhausted: {}", message),
                            billed: None,
                        });
                    }
                    match self.reacquire().await {
                        Some(next) => lease = next,
                        None => {
                            self.signal_exhaustion().await;
                            return Ok(DispatchOutcome::NoSlot);
                        }
                    }
                }
            }
        }
        Ok(DispatchOutcome::Failed {
            error: "retries exhausted".to_string(),
            billed: None,
        })
    }

    async fn reacquire(&self) -> Option<Lease> {
        self.deps
            .pool
            .acquire(self.deps.policy.retry_acquire_timeout())
            .await
    }

    async fn record(
        &mut self,
        item: &WorkItem,
        outcome: DispatchOutcome,
    ) -> Result<LoopState, GenError> {
        match outcome {
            DispatchOutcome::NoSlot => return Ok(LoopState::FetchNext),
            DispatchOutcome::Generated { tier, cost } => {
                self.deps.ledger.add_cost(cost, tier)?;
                self.deps
                    .sessions
                    .update_progress(&item.id, ItemStatus::Done, cost, tier, None)?;
                self.consecutive_failures = 0;
                info!(item_id = %item.id, tier = %tier, cost, "item generated");
                if tier == Tier::Fallback && self.deps.pool.try_recover() {
                    self.deps
                        .notifier
                        .notify(&NotifyEvent::TierSwitch {
                            from: Tier::Fallback,
                            to: Tier::Primary,
                            reason: "primary credential available again".to_string(),
                        })
                        .await;
                }
            }
            DispatchOutcome::Failed { error, billed } => {
                let tier = billed.map(|(t, _)| t).unwrap_or_else(|| self.deps.pool.tier());
                if let Some((billed_tier, cost)) = billed {
                    self.deps.ledger.add_cost(cost, billed_tier)?;
                }
                self.deps.sessions.update_progress(
                    &item.id,
                    ItemStatus::Failed,
                    0.0,
                    tier,
                    Some(&error),
                )?;
                self.consecutive_failures += 1;
                warn!(
                    item_id = %item.id,
                    consecutive = self.consecutive_failures,
                    error = %error,
                    "item failed"
                );
                self.last_error = error;
            }
        }

        self.attempts += 1;

        let limit = self.deps.policy.consecutive_failure_limit;
        if self.consecutive_failures >= limit {
            self.deps
                .notifier
                .notify(&NotifyEvent::ConsecutiveFailures {
                    count: self.consecutive_failures,
                    last_error: self.last_error.clone(),
                })
                .await;
            return Ok(LoopState::Stopped(HaltReason::ConsecutiveFailures {
                count: self.consecutive_failures,
            }));
        }

        let (calls, attempts) = self.overhead_counters()?;
        if self.deps.policy.overhead_exceeded(calls, attempts) {
            warn!(calls, attempts, "call overhead exceeded");
            return Ok(LoopState::Stopped(HaltReason::OverheadExceeded { calls, attempts }));
        }
        Ok(LoopState::Waiting)
    }

    fn overhead_counters(&self) -> Result<(u64, u64), GenError> {
        Ok(match self.deps.policy.overhead_scope {
            OverheadScope::Session => (self.deps.pool.session_calls(), self.attempts),
            OverheadScope::PoolLifetime => (
                self.deps.pool.total_calls_today(),
                self.current_session()?.progress.attempted(),
            ),
        })
    }

    fn random_delay(&self) -> Duration {
        let min = self.deps.policy.delay_min_secs;
        let max = self.deps.policy.delay_max_secs.max(min);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }

    /// Inter-call delay. Returns true if shutdown was requested.
    async fn pause(&mut self) -> bool {
        if self.interrupted() {
            return true;
        }
        let delay = self.random_delay();
        if delay.is_zero() {
            return false;
        }
        debug!(delay_secs = delay.as_secs(), "waiting before next item");
        tokio::select! {
            _ = sleep(delay) => false,
            changed = self.shutdown.changed() => match changed {
                Ok(()) => *self.shutdown.borrow(),
                Err(_) => {
                    sleep(delay).await;
                    false
                }
            },
        }
    }

    fn maybe_report(&mut self) -> Result<(), GenError> {
        let now = self.deps.clock.now();
        if now - self.last_report < self.deps.policy.report_interval() {
            return Ok(());
        }
        self.last_report = now;
        let session = self.current_session()?;
        let summary = self.deps.ledger.summary()?;
        info!(
            session_id = %session.session_id,
            generated = session.progress.generated,
            failed = session.progress.failed,
            pending = session.pending_count(),
            session_cost = session.progress.session_cost,
            daily_total = summary.daily.total_cost,
            tier = %self.deps.pool.tier(),
            calls = self.deps.pool.session_calls(),
            "progress report"
        );
        Ok(())
    }

    async fn notify_cost_limit(&self, reason: String) -> Result<(), GenError> {
        let summary = self.deps.ledger.summary()?;
        self.deps
            .notifier
            .notify(&NotifyEvent::CostLimit {
                reason,
                daily_total: summary.daily.total_cost,
                monthly_total: summary.monthly.total_cost,
            })
            .await;
        Ok(())
    }

    fn interrupt_report(&self) -> Result<RunReport, GenError> {
        let session = self.current_session()?;
        info!(
            session_id = %session.session_id,
            pending = session.pending_count(),
            "generation loop interrupted; session left resumable"
        );
        Ok(RunReport {
            session_id: session.session_id,
            outcome: RunOutcome::Interrupted,
            progress: session.progress,
            calls: self.deps.pool.session_calls(),
            attempts: self.attempts,
        })
    }

    async fn finish(&self, halt: HaltReason) -> Result<RunReport, GenError> {
        let calls = self.deps.pool.session_calls();
        let reason = halt.to_string();
        if let HaltReason::PreCheck { .. } = halt {
            self.notify_cost_limit(reason.clone()).await?;
        }
        let closed = self.deps.sessions.close(&reason, Some(calls))?;

        // Verify call usage against attempts for the whole run.
        let expected_max = self.attempts as f64 * (1.0 + self.deps.policy.overhead_ratio);
        if calls as f64 > expected_max && self.attempts > 0 {
            warn!(calls, attempts = self.attempts, "call usage above expected");
        } else {
            info!(calls, attempts = self.attempts, "call usage verified");
        }

        self.deps
            .notifier
            .notify(&NotifyEvent::SessionComplete {
                session_id: closed.session_id.clone(),
                reason: reason.clone(),
                generated: closed.progress.generated,
                failed: closed.progress.failed,
                primary_count: closed.progress.primary_count,
                fallback_count: closed.progress.fallback_count,
                session_cost: closed.progress.session_cost,
            })
            .await;

        Ok(RunReport {
            session_id: closed.session_id,
            outcome: RunOutcome::Halted(halt),
            progress: closed.progress,
            calls,
            attempts: self.attempts,
        })
    }
}
