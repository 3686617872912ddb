//! genloop: Generation Session Controller
//!
//! Drives a long-running, sequential image generation job against a metered
//! remote API. A pool of rate-limited credentials, a persisted cost ledger
//! and a checkpointed session record let a run stop on cost, time, target
//! or quota conditions and resume after a crash without repeating work.

pub mod backend;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod limiter;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod request;
pub mod session;
pub mod sink;
pub mod stop;
pub mod store;
pub mod types;
