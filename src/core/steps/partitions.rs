//! Structure contents and partition images
//!
//! `populate-bootfs-contents` stages the gadget content of every filesystem
//! structure other than the rootfs; `populate-prepare-partitions` turns each
//! structure into an image file that `make-disk` later copies into place.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::core::builder::ImageBuilder;
use crate::core::context::WorkDirs;
use crate::core::gadget::{LaidOutStructure, Role, VolumeContent, VolumeStructure};
use crate::core::partition::should_skip_structure;
use crate::infra::filesystem;
use crate::infra::mkfs::{self, FilesystemImage};

/// Whether a structure gets an image of its own
fn needs_image(structure: &VolumeStructure, is_seeded: bool) -> bool {
    !should_skip_structure(structure, is_seeded)
}

/// Stage gadget contents of the filesystem structures
pub fn populate_bootfs_contents<B: ImageBuilder>(builder: &mut B) -> Result<()> {
    let machine = builder.machine();
    let common = &machine.context.common;
    let Some(gadget) = &common.gadget else {
        return Ok(());
    };
    let dirs = machine.dirs()?;

    for volume in gadget.volumes.values() {
        for (index, structure) in volume.structures.iter().enumerate() {
            if !structure.has_filesystem()
                || structure.role == Role::SystemData
                || !needs_image(structure, common.is_seeded)
            {
                continue;
            }
            let staging = dirs.part_contents(&volume.name, index);
            filesystem::recreate_dir(&staging)?;
            for content in &structure.content {
                stage_content(&dirs.gadget, &staging, content).with_context(|| {
                    format!(
                        "Failed to stage contents of '{}' in volume '{}'",
                        structure.display_name(),
                        volume.name
                    )
                })?;
            }
            tracing::debug!(
                "Staged contents of '{}' in {}",
                structure.display_name(),
                staging.display()
            );
        }
    }
    Ok(())
}

/// Copy one `source`/`target` content entry into a staging directory
///
/// A source ending in `/` copies the directory's contents; a target ending
/// in `/` keeps the source file name.
fn stage_content(gadget_dir: &Path, staging: &Path, content: &VolumeContent) -> Result<()> {
    let (Some(source), Some(target)) = (&content.source, &content.target) else {
        if content.image.is_some() {
            bail!("Image content is only valid for structures without a filesystem");
        }
        bail!("Content entries need both source and target");
    };
    let from = gadget_dir.join(source.trim_start_matches('/'));
    let mut to = staging.join(target.trim_start_matches('/'));

    if from.is_dir() {
        filesystem::copy_dir_contents(&from, &to)?;
        return Ok(());
    }
    if !from.is_file() {
        bail!("Gadget content '{source}' not found");
    }
    if target.ends_with('/') || to.is_dir() {
        let name = from
            .file_name()
            .with_context(|| format!("Gadget content '{source}' has no file name"))?;
        to = to.join(name);
    }
    filesystem::copy_file(&from, &to)?;
    Ok(())
}

/// Produce one image file per structure
pub fn populate_prepare_partitions<B: ImageBuilder>(builder: &mut B) -> Result<()> {
    let machine = builder.machine();
    let common = &machine.context.common;
    let Some(gadget) = &common.gadget else {
        return Ok(());
    };
    let dirs = machine.dirs()?;
    let sector_size = machine.common_options().sector_size;

    for volume in gadget.volumes.values() {
        filesystem::create_dir_all(&dirs.volumes.join(&volume.name))?;
        for laid_out in volume.layout()? {
            let structure = laid_out.structure;
            if !needs_image(structure, common.is_seeded) {
                continue;
            }
            let image = dirs.part_image(&volume.name, laid_out.index);
            if structure.has_filesystem() {
                let contents = filesystem_contents(dirs, &volume.name, &laid_out);
                let fs_type = structure.filesystem.as_deref().unwrap_or_default();
                mkfs::make_filesystem(
                    fs_type,
                    &FilesystemImage {
                        image: &image,
                        size: laid_out.size,
                        label: structure.label.as_deref(),
                        contents: contents.as_deref(),
                        sector_size,
                    },
                )
                .with_context(|| {
                    format!(
                        "Failed to prepare '{}' in volume '{}'",
                        structure.display_name(),
                        volume.name
                    )
                })?;
            } else {
                prepare_raw_image(&dirs.gadget, &image, &laid_out)?;
            }
            tracing::info!(
                "Prepared '{}' ({} bytes) for volume '{}'",
                structure.display_name(),
                laid_out.size,
                volume.name
            );
        }
    }
    Ok(())
}

fn filesystem_contents(dirs: &WorkDirs, volume: &str, laid_out: &LaidOutStructure<'_>) -> Option<PathBuf> {
    if laid_out.structure.role == Role::SystemData {
        return Some(dirs.rootfs.clone());
    }
    let staging = dirs.part_contents(volume, laid_out.index);
    staging.is_dir().then_some(staging)
}

/// Build a raw structure image from its `image` content entries
fn prepare_raw_image(gadget_dir: &Path, image: &Path, laid_out: &LaidOutStructure<'_>) -> Result<()> {
    let structure = laid_out.structure;
    filesystem::create_sized_file(image, laid_out.size)?;
    for content in &structure.content {
        let Some(blob) = &content.image else {
            bail!(
                "Structure '{}' has no filesystem, so its contents must be images",
                structure.display_name()
            );
        };
        let source = gadget_dir.join(blob.trim_start_matches('/'));
        let offset = content.offset.map_or(0, |o| o.bytes());
        let length = std::fs::metadata(&source)
            .with_context(|| format!("Gadget image '{blob}' not found"))?
            .len();
        if offset.checked_add(length).map_or(true, |end| end > laid_out.size) {
            bail!(
                "Image '{blob}' ({length} bytes at offset {offset}) does not fit in '{}' ({} bytes)",
                structure.display_name(),
                laid_out.size
            );
        }
        filesystem::write_at(image, &source, offset)?;
    }
    Ok(())
}
