//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::application::{EndpointCategory, OutputFormat};

/// chat-bridge - decode, reconcile and relay captured chat library traffic.
#[derive(Parser, Debug)]
#[command(name = "chat-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format: markdown, json, or table.
    #[arg(short, long, default_value = "markdown")]
    pub format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode one captured body with a specific endpoint decoder.
    Decode {
        /// Endpoint: chat, list, create, update or delete.
        #[arg(value_parser = parse_category)]
        category: EndpointCategory,

        /// File holding the response body.
        body: PathBuf,

        /// File holding the request body (needed for delete).
        #[arg(short, long)]
        request: Option<PathBuf>,
    },

    /// Replay captured exchanges through the interceptor and apply the results.
    Replay {
        /// Capture file (JSON lines of exchanges).
        capture: PathBuf,

        /// Print decoded records instead of writing to the store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a library scan from a DOM snapshot and the traffic it triggered.
    Scan {
        /// DOM snapshot (JSON array of {href, title}).
        dom: PathBuf,

        /// Capture file recorded while the list was walked.
        capture: PathBuf,

        /// Reconcile without writing to the store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Export the store as a chunked frame file.
    Export {
        /// Output frame file.
        output: PathBuf,

        /// Override the configured frame size, in bytes.
        #[arg(long)]
        frame_size: Option<usize>,
    },

    /// Import every complete transfer from a frame file into the store.
    Import {
        /// Input frame file.
        input: PathBuf,
    },

    /// List stored library items.
    List {
        /// Maximum number of items to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default configuration file if missing.
    Init,
    /// Print the effective configuration.
    Show,
}

fn parse_category(s: &str) -> Result<EndpointCategory, String> {
    s.parse()
}

impl Cli {
    /// Parse the output format argument.
    pub fn output_format(&self) -> Result<OutputFormat, String> {
        self.format.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_scan_command() {
        let cli = Cli::try_parse_from(["chat-bridge", "-vv", "scan", "dom.json", "cap.jsonl"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Scan { dry_run: false, .. }
        ));
    }

    #[test]
    fn test_rejects_unknown_category() {
        assert!(Cli::try_parse_from(["chat-bridge", "decode", "bogus", "body.txt"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
