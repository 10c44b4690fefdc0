//! Images packed from a prepared gadget tree and root filesystem

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::builder::ImageBuilder;
use crate::core::context::BuildIdentity;
use crate::core::options::{ArtifactType, PackOptions};
use crate::core::pipeline::{StateMachine, Step};
use crate::core::steps::{self, gadget, rootfs};
use crate::error::ConfigError;

/// Checkpointed state of a pack build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackState {
    /// Converted images
    #[serde(default)]
    pub qcow2_images: Vec<std::path::PathBuf>,
}

/// Pack image builder
#[derive(Debug, Default)]
pub struct PackBuilder {
    machine: StateMachine<PackState>,
    opts: PackOptions,
}

impl PackBuilder {
    /// Create a builder with the variant options
    pub fn new(opts: PackOptions) -> Self {
        Self {
            machine: StateMachine::new(),
            opts,
        }
    }

    fn prepare_gadget_tree(&mut self) -> Result<()> {
        let source = self.opts.gadget_dir.clone();
        gadget::copy_gadget_tree(self, &source)
    }

    fn populate_rootfs_contents(&mut self) -> Result<()> {
        let source = self.opts.rootfs_dir.clone();
        rootfs::populate_rootfs_from(self, &source)
    }

    fn make_qcow2_image(&mut self) -> Result<()> {
        if self.opts.artifact_type != ArtifactType::Qcow2 {
            return Ok(());
        }
        let converted = steps::convert_disks_to_qcow2(self)?;
        // Only the qcow2 images are kept for this artifact type
        for disk in self.machine.context.common.disks.values() {
            if disk.path.is_file() {
                std::fs::remove_file(&disk.path)
                    .with_context(|| format!("Failed to remove {}", disk.path.display()))?;
            }
        }
        self.machine.state_mut().qcow2_images = converted;
        Ok(())
    }
}

impl ImageBuilder for PackBuilder {
    type State = PackState;

    fn kind(&self) -> &'static str {
        "pack"
    }

    fn steps(&self) -> Vec<Step<Self>> {
        vec![
            Step::new("make-temporary-directories", steps::make_temporary_directories::<Self>),
            Step::new("prepare-gadget-tree", Self::prepare_gadget_tree),
            Step::new("populate-rootfs-contents", Self::populate_rootfs_contents),
            Step::new("load-gadget-yaml", steps::load_gadget_yaml::<Self>),
            Step::new("set-artifact-names", steps::set_artifact_names::<Self>),
            Step::new("calculate-rootfs-size", steps::calculate_rootfs_size::<Self>),
            Step::new("populate-bootfs-contents", steps::populate_bootfs_contents::<Self>),
            Step::new("populate-prepare-partitions", steps::populate_prepare_partitions::<Self>),
            Step::new("make-disk", steps::make_disk::<Self>),
            Step::new("make-qcow2-image", Self::make_qcow2_image),
        ]
    }

    fn identity(&self) -> BuildIdentity {
        BuildIdentity::new(self.kind(), self.machine.common_options().sector_size)
            .with_input("gadget-dir", self.opts.gadget_dir.display())
            .with_input("rootfs-dir", self.opts.rootfs_dir.display())
            .with_input("artifact-type", self.opts.artifact_type)
    }

    fn machine(&self) -> &StateMachine<PackState> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<PackState> {
        &mut self.machine
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (what, path) in [
            ("Gadget directory", &self.opts.gadget_dir),
            ("Rootfs directory", &self.opts.rootfs_dir),
        ] {
            if !path.is_dir() {
                return Err(ConfigError::MissingInput {
                    what: what.to_string(),
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::CHECKPOINT_FILE;
    use crate::core::context::BuildContext;
    use crate::core::options::{CommonOptions, StateMachineOptions};
    use assert_fs::prelude::*;

    const GADGET: &str = r#"
[volumes.pc]
schema = "gpt"

[[volumes.pc.structure]]
name = "ubuntu-data"
role = "system-data"
filesystem = "ext4"
type = "0FC63DAF-8483-4772-8E79-3D69D8477DE4"
size = "1M"
"#;

    fn inputs() -> assert_fs::TempDir {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("gadget/meta/gadget.toml").write_str(GADGET).unwrap();
        dir.child("rootfs/etc/hostname").write_str("packed\n").unwrap();
        dir.child("rootfs/usr/bin/tool").write_binary(&[7u8; 4096]).unwrap();
        dir
    }

    fn builder(dir: &assert_fs::TempDir, opts: StateMachineOptions) -> PackBuilder {
        let mut builder = PackBuilder::new(PackOptions {
            gadget_dir: dir.path().join("gadget"),
            rootfs_dir: dir.path().join("rootfs"),
            artifact_type: ArtifactType::Raw,
        });
        builder.set_common_options(
            CommonOptions {
                output_dir: Some(dir.path().join("out")),
                ..Default::default()
            },
            opts,
        );
        builder
    }

    #[test]
    fn test_thru_calculate_rootfs_size_then_inspect_checkpoint() {
        let dir = inputs();
        let work = dir.path().join("work");
        let mut builder = builder(
            &dir,
            StateMachineOptions {
                work_dir: Some(work.clone()),
                thru: Some("calculate-rootfs-size".to_string()),
                ..Default::default()
            },
        );
        builder.setup().unwrap();
        builder.run().unwrap();
        builder.teardown().unwrap();

        dir.child("work/root/etc/hostname").assert("packed\n");
        dir.child("work/unpack/gadget/meta/gadget.toml").assert(GADGET);

        let saved: BuildContext<PackState> =
            BuildContext::load(&work.join(CHECKPOINT_FILE)).unwrap();
        assert_eq!(saved.next_step_name(), Some("populate-bootfs-contents"));
        assert_eq!(saved.common.artifact_names["pc"], "pc.img");
        assert_eq!(saved.common.rootfs_size, Some(1024 * 1024));
        let gadget = saved.common.gadget.unwrap();
        assert_eq!(
            gadget.volumes["pc"].structures[0].effective_size(),
            Some(1024 * 1024)
        );
    }

    #[test]
    fn test_resume_with_other_rootfs_is_rejected() {
        let dir = inputs();
        let work = dir.path().join("work");
        let mut first = builder(
            &dir,
            StateMachineOptions {
                work_dir: Some(work.clone()),
                thru: Some("load-gadget-yaml".to_string()),
                ..Default::default()
            },
        );
        first.setup().unwrap();
        first.run().unwrap();
        first.teardown().unwrap();

        dir.child("other-rootfs").create_dir_all().unwrap();
        let mut second = PackBuilder::new(PackOptions {
            gadget_dir: dir.path().join("gadget"),
            rootfs_dir: dir.path().join("other-rootfs"),
            artifact_type: ArtifactType::Raw,
        });
        second.set_common_options(
            CommonOptions::default(),
            StateMachineOptions {
                work_dir: Some(work),
                resume: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            second.setup(),
            Err(crate::error::BuildError::Config(ConfigError::ResumeMismatch { field, .. }))
                if field == "rootfs-dir"
        ));
    }

    #[test]
    fn test_missing_inputs() {
        let builder = PackBuilder::new(PackOptions {
            gadget_dir: "/nonexistent/gadget".into(),
            rootfs_dir: "/nonexistent/rootfs".into(),
            artifact_type: ArtifactType::Raw,
        });
        assert!(matches!(
            builder.validate(),
            Err(ConfigError::MissingInput { .. })
        ));
    }
}
