//! Pack command implementation
//!
//! Implements `ubuntu-image pack` to assemble an image from a prepared
//! gadget tree and root filesystem.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::{drive, CommonArgs};
use crate::cli::output::OutputConfig;
use crate::core::options::{ArtifactType, PackOptions};
use crate::core::pack::PackBuilder;

/// Arguments of `ubuntu-image pack`
#[derive(Args, Debug)]
pub struct PackArgs {
    /// Prepared gadget tree (containing meta/gadget.toml)
    #[arg(long, value_name = "DIR")]
    pub gadget_dir: PathBuf,

    /// Prepared root filesystem
    #[arg(long, value_name = "DIR")]
    pub rootfs_dir: PathBuf,

    /// Disk artifact to produce (raw or qcow2)
    #[arg(long, default_value = "raw")]
    pub artifact_type: ArtifactType,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Execute the pack command
pub fn execute(args: PackArgs, output: &OutputConfig) -> Result<()> {
    tracing::info!(
        "Packing {} and {} into a {} image",
        args.gadget_dir.display(),
        args.rootfs_dir.display(),
        args.artifact_type
    );
    let builder = PackBuilder::new(PackOptions {
        gadget_dir: args.gadget_dir,
        rootfs_dir: args.rootfs_dir,
        artifact_type: args.artifact_type,
    });
    drive(builder, args.common, output)
}
