//! Integration tests for the generation session controller

mod config_layers;
mod generation_loop;
mod ledger_rollover;
mod session_resume;
pub mod support;
