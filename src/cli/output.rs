//! Output formatting
//!
//! Log level selection, status messages and error display.

use tracing::Level;

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}

/// Output settings chosen on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Only errors are printed
    pub quiet: bool,
    /// Informational logging
    pub verbose: bool,
    /// Debug logging
    pub debug: bool,
}

impl OutputConfig {
    /// Create an output configuration
    pub fn new(quiet: bool, verbose: bool, debug: bool) -> Self {
        Self {
            quiet,
            verbose,
            debug,
        }
    }

    /// Default log level: `debug` with `--debug`, `info` with `--verbose`
    pub fn log_level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else if self.quiet {
            Level::ERROR
        } else if self.verbose {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Print a success line unless quiet
    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {message}", status::SUCCESS);
        }
    }

    /// Print an informational line unless quiet
    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{} {message}", status::INFO);
        }
    }
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  Caused by: {cause}");
    }
}
