//! Images built from a model assertion
//!
//! `snap prepare-image` resolves the model into a seed and a gadget tree;
//! the remaining steps lay the seed out on disk according to the gadget.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;

use crate::core::builder::ImageBuilder;
use crate::core::context::BuildIdentity;
use crate::core::options::SnapOptions;
use crate::core::pipeline::{StateMachine, Step};
use crate::core::steps::{self, rootfs};
use crate::error::ConfigError;
use crate::infra::{filesystem, process};

/// Seed manifest written next to the images
pub const SEED_MANIFEST: &str = "seed.manifest";

/// Checkpointed state of a snap build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapState {
    /// Directory `snap prepare-image` populated
    #[serde(default)]
    pub prepared_image: Option<PathBuf>,
}

/// Snap image builder
#[derive(Debug, Default)]
pub struct SnapBuilder {
    machine: StateMachine<SnapState>,
    opts: SnapOptions,
}

impl SnapBuilder {
    /// Create a builder with the variant options
    pub fn new(mut opts: SnapOptions) -> Self {
        opts.apply_defaults();
        Self {
            machine: StateMachine::new(),
            opts,
        }
    }

    /// Variant options
    pub fn options(&self) -> &SnapOptions {
        &self.opts
    }

    fn prepare_image(&mut self) -> Result<()> {
        process::require_tool("snap")?;
        let unpack = self.machine.dirs()?.unpack.clone();
        let prepared = unpack.join("image");
        filesystem::remove_dir_all(&prepared)?;
        filesystem::remove_dir_all(&unpack.join("gadget"))?;

        let mut cmd = Command::new("snap");
        cmd.arg("prepare-image");
        if let Some(channel) = &self.opts.channel {
            cmd.arg(format!("--channel={channel}"));
        }
        for snap in &self.opts.snaps {
            cmd.arg(format!("--snap={snap}"));
        }
        cmd.arg(&self.opts.model_assertion).arg(&unpack);
        process::run(&mut cmd).context("Failed to prepare the image seed")?;

        self.machine.state_mut().prepared_image = Some(prepared);
        Ok(())
    }

    fn populate_rootfs_contents(&mut self) -> Result<()> {
        let prepared = self
            .machine
            .state()
            .prepared_image
            .clone()
            .context("prepare-image has not run")?;
        rootfs::populate_rootfs_from(self, &prepared)
    }

    fn generate_snap_manifest(&mut self) -> Result<()> {
        let rootfs = self.machine.dirs()?.rootfs.clone();
        let seed = ["var/lib/snapd/seed/snaps", "snaps"]
            .iter()
            .map(|dir| rootfs.join(dir))
            .find(|dir| dir.is_dir());
        let Some(seed) = seed else {
            tracing::warn!("No seeded snaps found, skipping {SEED_MANIFEST}");
            return Ok(());
        };

        let mut names = std::fs::read_dir(&seed)
            .with_context(|| format!("Failed to read {}", seed.display()))?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect::<Vec<_>>();
        names.sort();

        let manifest = seed_manifest(&names);
        let path = self.machine.common_options().output_dir().join(SEED_MANIFEST);
        filesystem::write_file(&path, &manifest)?;
        tracing::info!("Wrote {}", path.display());
        Ok(())
    }
}

/// Render `name revision` lines for seeded `<name>_<revision>.snap` files
pub fn seed_manifest(file_names: &[String]) -> String {
    file_names
        .iter()
        .filter_map(|file| file.strip_suffix(".snap"))
        .filter_map(|stem| stem.rsplit_once('_'))
        .map(|(name, revision)| format!("{name} {revision}\n"))
        .collect()
}

impl ImageBuilder for SnapBuilder {
    type State = SnapState;

    fn kind(&self) -> &'static str {
        "snap"
    }

    fn steps(&self) -> Vec<Step<Self>> {
        vec![
            Step::new("make-temporary-directories", steps::make_temporary_directories::<Self>),
            Step::new("prepare-image", Self::prepare_image),
            Step::new("load-gadget-yaml", steps::load_gadget_yaml::<Self>),
            Step::new("set-artifact-names", steps::set_artifact_names::<Self>),
            Step::new("populate-rootfs-contents", Self::populate_rootfs_contents),
            Step::new("generate-disk-info", steps::generate_disk_info::<Self>),
            Step::new("calculate-rootfs-size", steps::calculate_rootfs_size::<Self>),
            Step::new("populate-bootfs-contents", steps::populate_bootfs_contents::<Self>),
            Step::new("populate-prepare-partitions", steps::populate_prepare_partitions::<Self>),
            Step::new("make-disk", steps::make_disk::<Self>),
            Step::new("generate-snap-manifest", Self::generate_snap_manifest),
        ]
    }

    fn identity(&self) -> BuildIdentity {
        BuildIdentity::new(self.kind(), self.machine.common_options().sector_size)
            .with_input("model-assertion", self.opts.model_assertion.display())
            .with_input("snaps", self.opts.snaps.join(","))
    }

    fn machine(&self) -> &StateMachine<SnapState> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<SnapState> {
        &mut self.machine
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.opts.model_assertion.is_file() {
            return Err(ConfigError::MissingInput {
                what: "Model assertion".to_string(),
                path: self.opts.model_assertion.clone(),
            });
        }
        Ok(())
    }
}
