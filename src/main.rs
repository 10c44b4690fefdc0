//! ubuntu-image CLI - Resumable disk image builder
//!
//! Entry point for the ubuntu-image command-line application.

use clap::error::ErrorKind;
use clap::Parser;

use ubuntu_image::cli::output::display_error;
use ubuntu_image::cli::Cli;

fn main() {
    // Help and version exit 0, every other parse failure exits 1
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Initialize tracing subscriber
    let output_config = cli.output_config();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(output_config.log_level().into()),
        )
        .init();

    if let Err(e) = cli.run() {
        display_error(&e);
        std::process::exit(1);
    }
}
