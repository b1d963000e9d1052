//! Diagnostic logging.
//!
//! The engine logs session lifecycle (join, resume, phase advances,
//! completion), integrity violations, persistence failures and registry
//! retries through `tracing`, with `session_id`, `phase_index` and
//! `violation_count` as structured fields.
//!
//! Logs always go to stderr: in `run` mode stdout carries the NDJSON event
//! stream and must not be interleaved with diagnostics. `-v` raises the
//! engine's own level one step ahead of its dependencies so that, for
//! example, `-v` shows phase advances without the Prometheus exporter's
//! chatter. `EXAMWARDEN_LOG_LEVEL` replaces the whole filter.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Environment variable that overrides the verbosity-derived filter.
pub const LOG_LEVEL_ENV: &str = "EXAMWARDEN_LOG_LEVEL";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with optional ANSI colors.
    #[default]
    Human,
    /// Newline-delimited JSON, for collectors that already parse the event
    /// stream.
    Json,
}

/// Filter directives for a `-v` count.
///
/// | `-v` | examwarden | dependencies |
/// |------|------------|--------------|
/// | 0    | warn       | warn         |
/// | 1    | info       | warn         |
/// | 2    | debug      | info         |
/// | 3+   | trace      | debug        |
#[must_use]
pub const fn verbosity_to_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,examwarden=info",
        2 => "info,examwarden=debug",
        _ => "debug,examwarden=trace",
    }
}

fn filter_for(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(verbosity_to_directive(verbosity)))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let filter = filter_for(verbosity);
    // Module paths only help once the per-tick and per-command noise is on.
    let show_target = verbosity >= 2;

    let use_ansi = match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    match format {
        LogFormat::Human => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(use_ansi)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
