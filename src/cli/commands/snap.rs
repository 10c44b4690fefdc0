//! Snap command implementation
//!
//! Implements `ubuntu-image snap` to build an image from a model assertion.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::{drive, CommonArgs};
use crate::cli::output::OutputConfig;
use crate::core::options::SnapOptions;
use crate::core::snap::SnapBuilder;

/// Arguments of `ubuntu-image snap`
#[derive(Args, Debug)]
pub struct SnapArgs {
    /// Model assertion file
    pub model_assertion: PathBuf,

    /// Extra snap to include (name or name=channel), repeatable
    #[arg(long = "snap", value_name = "SNAP")]
    pub snaps: Vec<String>,

    /// Channel snaps are fetched from
    #[arg(short, long)]
    pub channel: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Execute the snap command
pub fn execute(args: SnapArgs, output: &OutputConfig) -> Result<()> {
    tracing::info!("Building snap image from {}", args.model_assertion.display());
    let builder = SnapBuilder::new(SnapOptions {
        model_assertion: args.model_assertion,
        snaps: args.snaps,
        channel: args.channel,
    });
    drive(builder, args.common, output)
}
