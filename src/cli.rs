//! CLI domain: parse, route, output, and presentation only.
//! No domain orchestration; the route table builds collaborators and
//! dispatches to domain services.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::{exit_code, map_error, EXIT_CONFIGURATION};
pub use parse::{
    Cli, Commands, ConfigCommands, LimitsCommands, OutputFormat, RunArgs, SessionCommands,
};
pub use presentation::{
    format_limits_text, format_run_report, format_session_list_json, format_session_list_text,
    format_status_json, format_status_text, StatusView,
};
pub use route::{default_payloads, open_store, read_payloads, RunContext};
