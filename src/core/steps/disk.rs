//! Disk image assembly

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::builder::ImageBuilder;
use crate::core::context::DiskImage;
use crate::core::gadget::Volume;
use crate::core::partition::{self, should_skip_structure};
use crate::infra::{filesystem, process, sfdisk};

/// Size of the image for a volume: the override, or the computed minimum
pub fn volume_image_size(volume: &Volume, sector_size: u64, requested: Option<u64>) -> Result<u64> {
    let minimum = partition::minimum_image_size(volume, sector_size)?;
    match requested {
        Some(size) if size < minimum => bail!(
            "Requested image size {size} for volume '{}' is smaller than the {minimum} bytes it needs",
            volume.name
        ),
        Some(size) => Ok(size),
        None => Ok(minimum),
    }
}

/// Write one disk image per volume
///
/// The image is created sparse, the synthesized partition table is written
/// with `sfdisk` and every prepared structure image is copied to its offset.
pub fn make_disk<B: ImageBuilder>(builder: &mut B) -> Result<()> {
    let machine = builder.machine_mut();
    let Some(gadget) = machine.context.common.gadget.clone() else {
        return Ok(());
    };
    let dirs = machine.dirs()?.clone();
    let options = machine.common_options();
    let sector_size = options.sector_size;
    let sizes = options.image_sizes()?;
    let output_dir = options.output_dir();
    let is_seeded = machine.context.common.is_seeded;
    filesystem::create_dir_all(&output_dir)?;

    for volume in gadget.volumes.values() {
        let size = volume_image_size(volume, sector_size, sizes.for_volume(&volume.name))?;
        let partitions = partition::synthesize(volume, sector_size, size, is_seeded)
            .with_context(|| format!("Invalid partition layout for volume '{}'", volume.name))?;

        let name = machine
            .context
            .common
            .artifact_names
            .get(&volume.name)
            .cloned()
            .unwrap_or_else(|| format!("{}.img", volume.name));
        let image = output_dir.join(name);
        tracing::info!(
            "Writing {} ({size} bytes, {} partitions)",
            image.display(),
            partitions.table.entries.len()
        );

        filesystem::create_sized_file(&image, size)?;
        if !partitions.table.entries.is_empty() {
            sfdisk::write_table(&image, &partitions.table)?;
        }
        for laid_out in volume.layout()? {
            if should_skip_structure(laid_out.structure, is_seeded) {
                continue;
            }
            let part = dirs.part_image(&volume.name, laid_out.index);
            if !part.is_file() {
                bail!(
                    "Image for '{}' is missing at {}",
                    laid_out.structure.display_name(),
                    part.display()
                );
            }
            filesystem::write_at(&image, &part, laid_out.offset)?;
        }
        if let Some(number) = partitions.rootfs_partition {
            tracing::info!("Root filesystem is partition {number} of {}", image.display());
        }

        machine.context.common.disks.insert(
            volume.name.clone(),
            DiskImage {
                path: image,
                size,
                partitions,
            },
        );
    }
    Ok(())
}

/// Convert every written disk image to qcow2 next to the raw image
///
/// Returns the paths of the converted images.
pub fn convert_disks_to_qcow2<B: ImageBuilder>(builder: &B) -> Result<Vec<PathBuf>> {
    let disks = &builder.machine().context.common.disks;
    if disks.is_empty() {
        return Ok(Vec::new());
    }
    process::require_tool("qemu-img")?;

    let mut converted = Vec::with_capacity(disks.len());
    for disk in disks.values() {
        let target = disk.path.with_extension("qcow2");
        convert_to_qcow2(&disk.path, &target)?;
        tracing::info!("Wrote {}", target.display());
        converted.push(target);
    }
    Ok(converted)
}

fn convert_to_qcow2(raw: &Path, target: &Path) -> Result<()> {
    let mut cmd = Command::new("qemu-img");
    cmd.args(["convert", "-c", "-O", "qcow2"]).arg(raw).arg(target);
    process::run(&mut cmd)
        .with_context(|| format!("Failed to convert {} to qcow2", raw.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gadget::{GadgetInfo, Size};

    const GADGET: &str = r#"
[volumes.pc]
schema = "gpt"

[[volumes.pc.structure]]
name = "data"
type = "0FC63DAF-8483-4772-8E79-3D69D8477DE4"
size = "4M"
"#;

    #[test]
    fn test_volume_image_size_defaults_to_minimum() {
        let info = GadgetInfo::from_toml(GADGET).unwrap();
        let volume = &info.volumes["pc"];
        // 1M offset + 4M data + 33 sectors of backup GPT
        let minimum = (5 << 20) + 33 * 512;
        assert_eq!(volume_image_size(volume, 512, None).unwrap(), minimum);
        assert_eq!(volume_image_size(volume, 512, Some(8 << 20)).unwrap(), 8 << 20);
    }

    #[test]
    fn test_volume_image_size_rejects_small_override() {
        let mut info = GadgetInfo::from_toml(GADGET).unwrap();
        let volume = &mut info.volumes["pc"];
        volume.structures[0].size = Some(Size(4 << 20));
        let err = volume_image_size(volume, 512, Some(1 << 20)).unwrap_err();
        assert!(err.to_string().contains("smaller"));
    }
}
