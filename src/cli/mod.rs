//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use anyhow::Result;
use clap::Parser;
use std::sync::OnceLock;

use commands::Commands;
use output::OutputConfig;

/// Version with the git revision the binary was built from
fn long_version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        let dirty = match option_env!("VERGEN_GIT_DIRTY") {
            Some("true") => "-dirty",
            _ => "",
        };
        format!(
            "{} ({}{dirty})",
            env!("CARGO_PKG_VERSION"),
            option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
        )
    })
}

/// ubuntu-image - Build bootable disk images
///
/// Builds are split into named steps. Use --until/--thru to stop early and
/// --resume --workdir to continue a stopped or failed build.
#[derive(Parser, Debug)]
#[command(name = "ubuntu-image")]
#[command(author, version, long_version = long_version(), about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Enable informational output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Output settings selected by the global flags
    pub fn output_config(&self) -> OutputConfig {
        OutputConfig::new(self.quiet, self.verbose, self.debug)
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = self.output_config();
        self.command.run(&output)
    }
}
