//! Root filesystem finishing and sizing

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::defaults::{
    ROOTFS_PADDING_DENOMINATOR, ROOTFS_PADDING_NUMERATOR, ROOTFS_SIZE_ALIGNMENT,
};
use crate::core::builder::ImageBuilder;
use crate::core::gadget::{Role, Size};
use crate::infra::filesystem;

/// Replace the rootfs contents with a copy of `source`
pub fn populate_rootfs_from<B: ImageBuilder>(builder: &B, source: &Path) -> Result<()> {
    let rootfs = builder.machine().dirs()?.rootfs.clone();
    if !source.is_dir() {
        bail!("Root filesystem not found at {}", source.display());
    }
    filesystem::recreate_dir(&rootfs)?;
    let copied = filesystem::copy_dir_contents(source, &rootfs)
        .with_context(|| format!("Failed to populate rootfs from {}", source.display()))?;
    tracing::info!("Copied {copied} entries into the rootfs");
    Ok(())
}

/// Copy the `--disk-info` file to `.disk/info` in the rootfs
pub fn generate_disk_info<B: ImageBuilder>(builder: &mut B) -> Result<()> {
    let machine = builder.machine();
    let Some(disk_info) = machine.common_options().disk_info.clone() else {
        return Ok(());
    };
    let target = machine.dirs()?.rootfs.join(".disk").join("info");
    filesystem::copy_file(&disk_info, &target)?;
    tracing::info!("Wrote disk info from {}", disk_info.display());
    Ok(())
}

/// Rootfs size for a given content size: padded and aligned
pub fn padded_rootfs_size(content_size: u64) -> u64 {
    let padded = (content_size * ROOTFS_PADDING_NUMERATOR).div_ceil(ROOTFS_PADDING_DENOMINATOR);
    padded.div_ceil(ROOTFS_SIZE_ALIGNMENT).max(1) * ROOTFS_SIZE_ALIGNMENT
}

/// Measure the rootfs and grow the system-data structures to fit it
pub fn calculate_rootfs_size<B: ImageBuilder>(builder: &mut B) -> Result<()> {
    let machine = builder.machine_mut();
    let content_size = filesystem::dir_size(&machine.dirs()?.rootfs);
    let size = padded_rootfs_size(content_size);
    tracing::info!("Rootfs holds {content_size} bytes, sizing it to {size} bytes");

    let common = &mut machine.context.common;
    common.rootfs_size = Some(size);
    let Some(gadget) = &mut common.gadget else {
        return Ok(());
    };
    for volume in gadget.volumes.values_mut() {
        for structure in &mut volume.structures {
            if structure.role != Role::SystemData {
                continue;
            }
            let declared = structure.effective_size().unwrap_or(0);
            if declared < size {
                tracing::info!(
                    "Growing '{}' in volume '{}' from {declared} to {size} bytes",
                    structure.display_name(),
                    volume.name
                );
                structure.size = Some(Size(size));
            }
        }
    }
    Ok(())
}
