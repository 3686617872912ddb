//! Credential definitions and per-credential runtime state.

use chrono::{DateTime, Local};
use serde::Serialize;

/// A resolved access credential.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub id: String,
    pub secret: String,
    /// Per-tier daily call cap; `None` uses the pool default.
    pub daily_cap: Option<u32>,
}

impl Credential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            daily_cap: None,
        }
    }

    pub fn with_daily_cap(mut self, cap: u32) -> Self {
        self.daily_cap = Some(cap);
        self
    }
}

// Secrets never reach logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("daily_cap", &self.daily_cap)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CredentialState {
    pub credential: Credential,
    pub last_used: Option<DateTime<Local>>,
    pub rate_limited_until: Option<DateTime<Local>>,
}

impl CredentialState {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            last_used: None,
            rate_limited_until: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.credential.id
    }

    pub fn cooling_down(&self, now: DateTime<Local>) -> bool {
        self.rate_limited_until.map_or(false, |until| until > now)
    }

    pub fn within_interval(&self, now: DateTime<Local>, min_interval: chrono::Duration) -> bool {
        self.last_used.map_or(false, |last| now - last < min_interval)
    }
}

/// Point-in-time view of one credential, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSnapshot {
    pub id: String,
    pub daily_cap: u32,
    pub primary_calls: u32,
    pub fallback_calls: u32,
    /// Seconds of cool-down remaining, zero when usable.
    pub cooldown_remaining_secs: i64,
    pub last_used: Option<DateTime<Local>>,
}

/// Lease returned by a successful acquire.
#[derive(Clone)]
pub struct Lease {
    pub credential_id: String,
    pub secret: String,
    pub tier: crate::types::Tier,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("credential_id", &self.credential_id)
            .field("tier", &self.tier)
            .finish()
    }
}
