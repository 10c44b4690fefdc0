//! CLI command implementations
//!
//! Each build variant is implemented in its own submodule.

pub mod classic;
pub mod pack;
pub mod snap;

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use super::output::OutputConfig;
use crate::core::builder::ImageBuilder;
use crate::core::options::{CommonOptions, StateMachineOptions};
use crate::core::pipeline::Status;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an image from a model assertion
    Snap(snap::SnapArgs),

    /// Build an image from a classic image definition
    Classic(classic::ClassicArgs),

    /// Pack a prepared gadget tree and rootfs into an image
    Pack(pack::PackArgs),
}

impl Commands {
    /// Execute the command
    pub fn run(self, output: &OutputConfig) -> Result<()> {
        match self {
            Self::Snap(args) => snap::execute(args, output),
            Self::Classic(args) => classic::execute(args, output),
            Self::Pack(args) => pack::execute(args, output),
        }
    }
}

/// Options shared by every build command
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Working directory for intermediate files and the checkpoint
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Stop before the named step (naming the --thru step too acts as --thru)
    #[arg(short, long, value_name = "STEP")]
    pub until: Option<String>,

    /// Stop after the named step
    #[arg(short, long, value_name = "STEP")]
    pub thru: Option<String>,

    /// Continue the build checkpointed in --workdir
    #[arg(short, long, requires = "workdir")]
    pub resume: bool,

    /// Directory receiving the images
    #[arg(short = 'O', long)]
    pub output_dir: Option<PathBuf>,

    /// Image size: one size for all volumes or volume:size pairs
    #[arg(short, long, value_name = "SIZE")]
    pub image_size: Option<String>,

    /// File copied to .disk/info in the rootfs
    #[arg(long, value_name = "FILE")]
    pub disk_info: Option<PathBuf>,

    /// Logical sector size in bytes (512 or 4096)
    #[arg(long, value_name = "BYTES")]
    pub sector_size: Option<u64>,
}

impl CommonArgs {
    /// Split into common and pipeline options
    pub fn into_options(self) -> (CommonOptions, StateMachineOptions) {
        let common = CommonOptions {
            output_dir: self.output_dir,
            image_size: self.image_size,
            disk_info: self.disk_info,
            sector_size: self.sector_size.unwrap_or(0),
        };
        let machine = StateMachineOptions {
            work_dir: self.workdir,
            until: self.until,
            thru: self.thru,
            resume: self.resume,
        };
        (common, machine)
    }
}

/// Run a builder through setup, run and teardown
///
/// Teardown runs whatever the outcome; a run error takes precedence over a
/// teardown error.
pub fn drive<B: ImageBuilder>(mut builder: B, args: CommonArgs, output: &OutputConfig) -> Result<()> {
    let (common, machine) = args.into_options();
    builder.set_common_options(common, machine);

    let result = builder.setup().and_then(|()| builder.run());
    let status = builder.machine().status();
    let next_step = builder.machine().context.next_step_name().map(str::to_string);
    let work_dir = builder.machine().work_dir().to_path_buf();
    let teardown = builder.teardown();
    result?;
    teardown?;

    match status {
        Status::StoppedEarly => output.info(&format!(
            "Stopped before '{}'. Resume with --resume --workdir {}",
            next_step.unwrap_or_default(),
            work_dir.display()
        )),
        _ => output.success(&format!("{} image build complete", builder.kind())),
    }
    Ok(())
}
