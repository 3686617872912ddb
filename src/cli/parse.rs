//! CLI parse: clap types for genloop. No behavior; definitions only.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// genloop - rate-limited, checkpointed image generation sessions
#[derive(Parser)]
#[command(name = "genloop")]
#[command(about = "Run image generation sessions under credential rate limits and cost caps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".", global = true)]
    pub workspace: PathBuf,

    /// Configuration file layered over global and workspace configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging, mirrored to stderr when logging to a file
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a generation session
    Run(RunArgs),
    /// Show spend, the active session and credential usage
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show or change the persisted cost caps
    Limits {
        #[command(subcommand)]
        command: LimitsCommands,
    },
    /// Manage the active session and archives
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of images to generate
    pub count: i64,

    /// Price calls at the discounted batch rate and pre-check the whole spend
    #[arg(long)]
    pub batch: bool,

    /// Work item payloads: a JSON array or one JSON value per line
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Continue an interrupted session without asking
    #[arg(long, conflicts_with = "discard")]
    pub resume: bool,

    /// Archive an interrupted session and start fresh without asking
    #[arg(long)]
    pub discard: bool,

    /// Stop after this many hours (0 = unlimited)
    #[arg(long)]
    pub max_hours: Option<f64>,

    /// Per-session spend cap in dollars
    #[arg(long)]
    pub session_cap: Option<f64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum LimitsCommands {
    /// Show current caps and spend
    Show,
    /// Update caps; omitted values stay unchanged
    Set {
        #[arg(long)]
        daily: Option<f64>,
        #[arg(long)]
        monthly: Option<f64>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommands {
    /// Archive the interrupted session as abandoned
    Discard,
    /// List archived sessions
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML with secrets redacted
    Show,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
