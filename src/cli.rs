//! CLI argument parsing for the cronista inspection tool

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for inspection commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "cronista")]
#[command(version)]
#[command(about = "Inspect persisted call timings and explain failures", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./cronista.toml, ./.cronista.toml, ~/.cronista.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List persisted timing documents, newest first
    List {
        /// Directory holding the documents (overrides local.data_dir)
        #[arg(short, long, value_name = "DIR")]
        data_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the summaries stored in one document
    Show {
        /// Path to a persisted document
        file: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Explain an error type and message in plain language
    Explain {
        /// Error type name, e.g. ConnectionError
        error_type: String,

        /// Error message
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_with_dir() {
        let cli = Cli::parse_from(["cronista", "list", "--data-dir", "/tmp/perf"]);
        match cli.command {
            Command::List { data_dir, format } => {
                assert_eq!(data_dir, Some(PathBuf::from("/tmp/perf")));
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_show_json() {
        let cli = Cli::parse_from(["cronista", "show", "run.json", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::Show { format: OutputFormat::Json, .. }
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["cronista", "explain", "E", "boom", "--debug"]);
        assert!(cli.debug);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["cronista"]).is_err());
    }
}
