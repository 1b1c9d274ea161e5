//! Command-line interface for takepick
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Package version plus git hash, as printed by `--version`.
static VERSION: LazyLock<String> = LazyLock::new(crate::version_string);

/// Automatic take selection for synthesized narration
#[derive(Parser, Debug)]
#[command(
    name = "takepick",
    version = VERSION.as_str(),
    about = "Automatic take selection for synthesized narration"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Sessions root directory (overrides config and TAKEPICK_ROOT)
    #[arg(long, global = true, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: info, -vv: debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Comma-separated weight values for one sweep axis.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightList(pub Vec<f64>);

/// Parse a comma-separated list of weights (e.g. `200,300,400`).
fn parse_weights(s: &str) -> Result<WeightList, String> {
    s.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| format!("'{}' is not a number", v))
        })
        .collect::<Result<Vec<f64>, String>>()
        .map(WeightList)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Select one candidate per chunk for a session
    Select {
        /// Session identifier (directory under the sessions root)
        session: String,

        /// Ignore stored progress and the checklist; decide every chunk again
        #[arg(long)]
        run_all: bool,

        /// Do not request more candidates for exhausted chunks
        #[arg(long)]
        no_topup: bool,

        /// Print the manifest as JSON instead of a report
        #[arg(long)]
        json: bool,
    },

    /// Compare a session's selections with its human picks
    Validate {
        /// Session identifier
        session: String,

        /// Earlier validation result to compare against
        /// (default: the session's last stored result)
        #[arg(long, value_name = "FILE")]
        previous: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sweep ranker weights across judged sessions
    Sweep {
        /// Sessions to score (at least two)
        #[arg(required = true, num_args = 1..)]
        sessions: Vec<String>,

        /// Quality weights to try (comma-separated)
        #[arg(long, value_name = "LIST", value_parser = parse_weights)]
        quality: Option<WeightList>,

        /// Echo weights to try (comma-separated)
        #[arg(long, value_name = "LIST", value_parser = parse_weights)]
        echo: Option<WeightList>,

        /// Tonal continuity weights to try (comma-separated)
        #[arg(long, value_name = "LIST", value_parser = parse_weights)]
        tonal: Option<WeightList>,

        /// Hiss weights to try (comma-separated)
        #[arg(long, value_name = "LIST", value_parser = parse_weights)]
        hiss: Option<WeightList>,

        /// Duration weights to try (comma-separated)
        #[arg(long, value_name = "LIST", value_parser = parse_weights)]
        duration: Option<WeightList>,

        /// Configurations to show
        #[arg(long, default_value = "10")]
        top: usize,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which sessions are resolved
    Status,

    /// View and create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
