//! Filesystem image creation
//!
//! ext4 images are populated at creation time with `mkfs.ext4 -d`; vfat
//! images are formatted with `mkfs.vfat` and filled with `mcopy`.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;

use crate::infra::{filesystem, process};

/// A filesystem image to create
#[derive(Debug, Clone, Copy)]
pub struct FilesystemImage<'a> {
    /// Image file to create or overwrite
    pub image: &'a Path,
    /// Image size in bytes
    pub size: u64,
    /// Filesystem label
    pub label: Option<&'a str>,
    /// Directory whose contents are copied into the filesystem
    pub contents: Option<&'a Path>,
    /// Logical sector size
    pub sector_size: u64,
}

/// Create a filesystem image of the given type
pub fn make_filesystem(fs_type: &str, target: &FilesystemImage<'_>) -> Result<()> {
    match fs_type {
        "ext4" | "ext3" | "ext2" => make_ext(fs_type, target),
        "vfat" | "fat32" | "fat16" => make_vfat(target),
        other => bail!("Unsupported filesystem '{other}'"),
    }
}

fn make_ext(fs_type: &str, target: &FilesystemImage<'_>) -> Result<()> {
    let tool = format!("mkfs.{fs_type}");
    process::require_tool(&tool)?;
    filesystem::create_sized_file(target.image, target.size)?;

    let mut cmd = Command::new(&tool);
    cmd.args(["-F", "-q"]);
    if let Some(label) = target.label {
        cmd.args(["-L", label]);
    }
    if let Some(contents) = target.contents {
        cmd.arg("-d").arg(contents);
    }
    cmd.arg(target.image);
    process::run(&mut cmd)
        .with_context(|| format!("Failed to create {fs_type} image {}", target.image.display()))?;
    Ok(())
}

fn make_vfat(target: &FilesystemImage<'_>) -> Result<()> {
    process::require_tool("mkfs.vfat")?;
    filesystem::create_sized_file(target.image, target.size)?;

    let mut cmd = Command::new("mkfs.vfat");
    cmd.arg("-S").arg(target.sector_size.to_string());
    if let Some(label) = target.label {
        cmd.args(["-n", label]);
    }
    cmd.arg(target.image);
    process::run(&mut cmd)
        .with_context(|| format!("Failed to create vfat image {}", target.image.display()))?;

    let Some(contents) = target.contents else {
        return Ok(());
    };
    let mut entries = std::fs::read_dir(contents)
        .with_context(|| format!("Failed to read {}", contents.display()))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect::<Vec<_>>();
    if entries.is_empty() {
        return Ok(());
    }
    entries.sort();

    process::require_tool("mcopy")?;
    let mut cmd = Command::new("mcopy");
    cmd.args(["-s", "-p", "-i"]).arg(target.image);
    cmd.args(&entries).arg("::");
    process::run(&mut cmd)
        .with_context(|| format!("Failed to copy files into {}", target.image.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_filesystem() {
        let image = FilesystemImage {
            image: Path::new("/tmp/never-created.img"),
            size: 1 << 20,
            label: None,
            contents: None,
            sector_size: 512,
        };
        let err = make_filesystem("zfs", &image).unwrap_err();
        assert!(err.to_string().contains("zfs"));
    }
}
