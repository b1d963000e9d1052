//! CLI argument definitions.
//!
//! All Clap derive structs for `examwarden` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Timed, proctored assessment runner.
#[derive(Parser, Debug)]
#[command(name = "examwarden", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "EXAMWARDEN_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true, env = "EXAMWARDEN_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one candidate session, driven by NDJSON commands on stdin.
    Run(RunArgs),

    /// Validate assessment files without running them.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the assessment YAML file.
    #[arg(short, long, env = "EXAMWARDEN_CONFIG")]
    pub config: PathBuf,

    /// Candidate joining a new session.
    #[arg(long, required_unless_present = "session", conflicts_with = "session")]
    pub candidate: Option<String>,

    /// Existing session to resume.
    #[arg(long)]
    pub session: Option<String>,

    /// Directory holding session records and snapshots.
    #[arg(long, default_value = ".examwarden", env = "EXAMWARDEN_STORE_DIR")]
    pub store_dir: PathBuf,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "EXAMWARDEN_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Write events to this file instead of stdout.
    #[arg(long)]
    pub events: Option<PathBuf>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Assessment files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}
