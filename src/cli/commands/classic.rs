//! Classic command implementation
//!
//! Implements `ubuntu-image classic` to build an image from an image
//! definition.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::{drive, CommonArgs};
use crate::cli::output::OutputConfig;
use crate::core::classic::ClassicBuilder;
use crate::core::options::ClassicOptions;

/// Arguments of `ubuntu-image classic`
#[derive(Args, Debug)]
pub struct ClassicArgs {
    /// Image definition file
    pub image_definition: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Execute the classic command
pub fn execute(args: ClassicArgs, output: &OutputConfig) -> Result<()> {
    tracing::info!("Building classic image from {}", args.image_definition.display());
    let builder = ClassicBuilder::new(ClassicOptions {
        image_definition: args.image_definition,
    });
    drive(builder, args.common, output)
}
