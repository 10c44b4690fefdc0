//! Images built from a classic image definition
//!
//! The definition names the gadget tree, the rootfs source, the
//! customization to apply and the artifacts to produce. Builds without a
//! gadget only produce rootfs artifacts; the disk steps complete as no-ops.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::builder::ImageBuilder;
use crate::core::context::BuildIdentity;
use crate::core::image_definition::ImageDefinition;
use crate::core::options::ClassicOptions;
use crate::core::pipeline::{StateMachine, Step};
use crate::core::steps::{self, gadget};
use crate::error::ConfigError;
use crate::infra::mount::{BindMount, CHROOT_BINDS};
use crate::infra::{filesystem, process};

/// Root filesystem line for `/etc/fstab` when the rootfs has none
const DEFAULT_FSTAB: &str = "LABEL=writable\t/\text4\tdiscard,errors=remount-ro\t0\t1\n";

/// Checkpointed state of a classic build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicState {
    /// Parsed image definition
    #[serde(default)]
    pub definition: Option<ImageDefinition>,
    /// Gadget tree built from the definition's sources
    #[serde(default)]
    pub built_gadget: Option<PathBuf>,
    /// Files written to the output directory
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

/// Classic image builder
#[derive(Debug, Default)]
pub struct ClassicBuilder {
    machine: StateMachine<ClassicState>,
    opts: ClassicOptions,
}

impl ClassicBuilder {
    /// Create a builder with the variant options
    pub fn new(mut opts: ClassicOptions) -> Self {
        opts.apply_defaults();
        Self {
            machine: StateMachine::new(),
            opts,
        }
    }

    fn definition(&self) -> Result<&ImageDefinition> {
        self.machine
            .state()
            .definition
            .as_ref()
            .context("parse-image-definition has not run")
    }

    fn output_path(&self, name: &str) -> PathBuf {
        self.machine.common_options().output_dir().join(name)
    }

    fn parse_image_definition(&mut self) -> Result<()> {
        let definition = ImageDefinition::load(&self.opts.image_definition)?;
        tracing::info!(
            "Building '{}' for {}",
            definition.name,
            definition.architecture
        );

        let common = &mut self.machine.context.common;
        common.without_gadget = definition.gadget.is_none();
        common.artifact_names = definition.artifacts.img.clone();
        self.machine.state_mut().definition = Some(definition);
        Ok(())
    }

    fn build_gadget_tree(&mut self) -> Result<()> {
        let Some(source) = self.definition()?.gadget.clone() else {
            return Ok(());
        };
        let build_dir = self.machine.dirs()?.scratch.join("gadget");
        filesystem::recreate_dir(&build_dir)?;
        filesystem::copy_dir_contents(&source.dir, &build_dir)
            .with_context(|| format!("Failed to copy gadget sources from {}", source.dir.display()))?;

        if source.make {
            process::require_tool("make")?;
            let arch = self.definition()?.architecture.clone();
            let mut cmd = Command::new("make");
            cmd.current_dir(&build_dir).env("ARCH", &arch);
            if let Some(series) = &self.definition()?.series {
                cmd.env("SERIES", series);
            }
            process::run(&mut cmd).context("Failed to build the gadget tree")?;
        }

        // Gadgets built with make conventionally install into install/
        let install = build_dir.join("install");
        let built = if install.is_dir() { install } else { build_dir };
        self.machine.state_mut().built_gadget = Some(built);
        Ok(())
    }

    fn prepare_gadget_tree(&mut self) -> Result<()> {
        let Some(built) = self.machine.state().built_gadget.clone() else {
            return Ok(());
        };
        gadget::copy_gadget_tree(self, &built)
    }

    fn build_rootfs(&mut self) -> Result<()> {
        let definition = self.definition()?.clone();
        let rootfs = self.machine.dirs()?.rootfs.clone();
        filesystem::recreate_dir(&rootfs)?;

        if let Some(tarball) = &definition.rootfs.tarball {
            process::require_tool("tar")?;
            let mut cmd = Command::new("tar");
            cmd.arg("--extract")
                .arg("--numeric-owner")
                .arg("--file")
                .arg(tarball)
                .arg("--directory")
                .arg(&rootfs);
            process::run(&mut cmd)
                .with_context(|| format!("Failed to unpack {}", tarball.display()))?;
        } else if let Some(archive) = &definition.rootfs.archive {
            let Some(series) = &definition.series else {
                bail!("Bootstrapping from an archive needs a series");
            };
            process::require_tool("debootstrap")?;
            let mut cmd = Command::new("debootstrap");
            cmd.arg(format!("--arch={}", definition.architecture));
            if !archive.components.is_empty() {
                cmd.arg(format!("--components={}", archive.components.join(",")));
            }
            cmd.arg(series).arg(&rootfs).arg(&archive.mirror);
            process::run(&mut cmd).context("Failed to bootstrap the rootfs")?;
        }
        tracing::info!("Root filesystem built in {}", rootfs.display());
        Ok(())
    }

    fn customize_rootfs(&mut self) -> Result<()> {
        let customization = self.definition()?.customization.clone();
        let rootfs = self.machine.dirs()?.rootfs.clone();

        if let Some(hostname) = &customization.hostname {
            filesystem::write_file(&rootfs.join("etc/hostname"), &format!("{hostname}\n"))?;
        }
        for file in &customization.files {
            let target = rootfs.join(file.destination.strip_prefix("/").unwrap_or(&file.destination));
            filesystem::copy_file(&file.source, &target)?;
        }
        if customization.execute.is_empty() {
            return Ok(());
        }

        process::require_tool("chroot")?;
        for bind in CHROOT_BINDS {
            let target = rootfs.join(bind.trim_start_matches('/'));
            let mount = BindMount::mount(Path::new(bind), &target)?;
            self.machine.register_resource(Box::new(mount));
        }
        for command in &customization.execute {
            let Some((program, args)) = command.split_first() else {
                continue;
            };
            let mut cmd = Command::new("chroot");
            cmd.arg(&rootfs).arg(program).args(args);
            process::run(&mut cmd)
                .with_context(|| format!("Customization command '{}' failed", command.join(" ")))?;
        }
        // Later steps measure and copy the rootfs, which must not see the mounts
        self.machine.release_resources()?;
        Ok(())
    }

    fn populate_rootfs_contents(&mut self) -> Result<()> {
        let rootfs = self.machine.dirs()?.rootfs.clone();
        let fstab = rootfs.join("etc/fstab");
        let has_entries = fstab.is_file()
            && filesystem::read_file(&fstab)?
                .lines()
                .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'));
        if !has_entries && !self.machine.context.common.without_gadget {
            filesystem::write_file(&fstab, DEFAULT_FSTAB)?;
        }

        // Every booted instance must generate its own machine id
        let machine_id = rootfs.join("etc/machine-id");
        if machine_id.is_file() {
            filesystem::write_file(&machine_id, "")?;
        }
        Ok(())
    }

    fn generate_package_manifest(&mut self) -> Result<()> {
        let Some(name) = self.definition()?.artifacts.manifest.clone() else {
            return Ok(());
        };
        process::require_tool("dpkg-query")?;
        let admin_dir = self.machine.dirs()?.rootfs.join("var/lib/dpkg");
        let mut cmd = Command::new("dpkg-query");
        cmd.arg(format!("--admindir={}", admin_dir.display()))
            .args(["--show", "--showformat=${Package} ${Version}\n"]);
        let output = process::run(&mut cmd).context("Failed to list installed packages")?;

        let path = self.output_path(&name);
        filesystem::write_file(&path, &String::from_utf8_lossy(&output.stdout))?;
        tracing::info!("Wrote {}", path.display());
        self.machine.state_mut().artifacts.push(path);
        Ok(())
    }

    fn make_qcow2_image(&mut self) -> Result<()> {
        if !self.definition()?.artifacts.qcow2 {
            return Ok(());
        }
        let converted = steps::convert_disks_to_qcow2(self)?;
        self.machine.state_mut().artifacts.extend(converted);
        Ok(())
    }

    fn make_rootfs_tarball(&mut self) -> Result<()> {
        let Some(name) = self.definition()?.artifacts.rootfs_tarball.clone() else {
            return Ok(());
        };
        process::require_tool("tar")?;
        let rootfs = self.machine.dirs()?.rootfs.clone();
        let path = self.output_path(&name);
        filesystem::create_dir_all(&self.machine.common_options().output_dir())?;

        let mut cmd = Command::new("tar");
        cmd.arg("--create")
            .arg("--auto-compress")
            .arg("--numeric-owner")
            .arg("--file")
            .arg(&path)
            .arg("--directory")
            .arg(&rootfs)
            .arg(".");
        process::run(&mut cmd).context("Failed to create the rootfs tarball")?;
        tracing::info!("Wrote {}", path.display());
        self.machine.state_mut().artifacts.push(path);
        Ok(())
    }
}

impl ImageBuilder for ClassicBuilder {
    type State = ClassicState;

    fn kind(&self) -> &'static str {
        "classic"
    }

    fn steps(&self) -> Vec<Step<Self>> {
        vec![
            Step::new("make-temporary-directories", steps::make_temporary_directories::<Self>),
            Step::new("parse-image-definition", Self::parse_image_definition),
            Step::new("build-gadget-tree", Self::build_gadget_tree),
            Step::new("prepare-gadget-tree", Self::prepare_gadget_tree),
            Step::new("load-gadget-yaml", steps::load_gadget_yaml::<Self>),
            Step::new("build-rootfs", Self::build_rootfs),
            Step::new("customize-rootfs", Self::customize_rootfs),
            Step::new("populate-rootfs-contents", Self::populate_rootfs_contents),
            Step::new("set-artifact-names", steps::set_artifact_names::<Self>),
            Step::new("generate-disk-info", steps::generate_disk_info::<Self>),
            Step::new("calculate-rootfs-size", steps::calculate_rootfs_size::<Self>),
            Step::new("populate-bootfs-contents", steps::populate_bootfs_contents::<Self>),
            Step::new("populate-prepare-partitions", steps::populate_prepare_partitions::<Self>),
            Step::new("make-disk", steps::make_disk::<Self>),
            Step::new("generate-package-manifest", Self::generate_package_manifest),
            Step::new("make-qcow2-image", Self::make_qcow2_image),
            Step::new("make-rootfs-tarball", Self::make_rootfs_tarball),
        ]
    }

    fn identity(&self) -> BuildIdentity {
        BuildIdentity::new(self.kind(), self.machine.common_options().sector_size)
            .with_input("image-definition", self.opts.image_definition.display())
    }

    fn machine(&self) -> &StateMachine<ClassicState> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<ClassicState> {
        &mut self.machine
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.opts.image_definition.is_file() {
            return Err(ConfigError::MissingInput {
                what: "Image definition".to_string(),
                path: self.opts.image_definition.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::step_names;
    use crate::core::options::{CommonOptions, StateMachineOptions};
    use assert_fs::prelude::*;

    const NO_GADGET: &str = r#"
name = "rootfs-only"
architecture = "amd64"

[rootfs]
tarball = "rootfs.tar"

[customization]
hostname = "edge"
"#;

    #[test]
    fn test_step_list_contains_build_rootfs() {
        let builder = ClassicBuilder::new(ClassicOptions::default());
        let names = step_names(&builder);
        assert_eq!(names.len(), 17);
        let rootfs = names.iter().position(|n| n == "build-rootfs").unwrap();
        let customize = names.iter().position(|n| n == "customize-rootfs").unwrap();
        assert!(rootfs < customize);
    }

    #[test]
    fn test_until_build_rootfs_without_gadget() {
        let project = assert_fs::TempDir::new().unwrap();
        let definition = project.child("definition.toml");
        definition.write_str(NO_GADGET).unwrap();
        let work = project.child("work");

        let mut builder = ClassicBuilder::new(ClassicOptions {
            image_definition: definition.path().to_path_buf(),
        });
        builder.set_common_options(
            CommonOptions::default(),
            StateMachineOptions {
                work_dir: Some(work.path().to_path_buf()),
                until: Some("build-rootfs".to_string()),
                ..Default::default()
            },
        );
        builder.setup().unwrap();
        builder.run().unwrap();
        builder.teardown().unwrap();

        let context = &builder.machine().context;
        assert_eq!(context.next_step_name(), Some("build-rootfs"));
        assert!(context.common.without_gadget);
        assert!(context.common.gadget.is_none());
        assert_eq!(
            builder.machine().state().definition.as_ref().unwrap().name,
            "rootfs-only"
        );
    }

    #[test]
    fn test_populate_rootfs_writes_fstab_and_clears_machine_id() {
        let project = assert_fs::TempDir::new().unwrap();
        let mut builder = ClassicBuilder::new(ClassicOptions::default());
        builder.machine.set_options(
            CommonOptions::default(),
            StateMachineOptions {
                work_dir: Some(project.path().to_path_buf()),
                ..Default::default()
            },
        );
        builder.machine.context.common.dirs =
            Some(crate::core::context::WorkDirs::under(project.path()));
        project.child("root/etc/machine-id").write_str("0123456789abcdef\n").unwrap();

        builder.populate_rootfs_contents().unwrap();
        project.child("root/etc/fstab").assert(DEFAULT_FSTAB);
        project.child("root/etc/machine-id").assert("");
    }

    #[test]
    fn test_missing_definition() {
        let builder = ClassicBuilder::new(ClassicOptions {
            image_definition: PathBuf::from("/nonexistent.toml"),
        });
        assert!(matches!(
            builder.validate(),
            Err(ConfigError::MissingInput { .. })
        ));
    }
}
