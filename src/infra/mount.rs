//! Bind mounts used while running commands inside a chroot

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::pipeline::ScopedResource;
use crate::infra::{filesystem, process};

/// Host directories bound into a chroot before running commands in it
pub const CHROOT_BINDS: &[&str] = &["/dev", "/proc", "/sys"];

/// An active bind mount, unmounted on release
#[derive(Debug)]
pub struct BindMount {
    target: PathBuf,
    mounted: bool,
}

impl BindMount {
    /// Bind `source` onto `target`, creating the target directory
    pub fn mount(source: &Path, target: &Path) -> Result<Self> {
        process::require_tool("mount")?;
        filesystem::create_dir_all(target)?;
        process::run(Command::new("mount").arg("--bind").arg(source).arg(target))
            .with_context(|| format!("Failed to bind {} onto {}", source.display(), target.display()))?;
        Ok(Self {
            target: target.to_path_buf(),
            mounted: true,
        })
    }
}

impl ScopedResource for BindMount {
    fn describe(&self) -> String {
        format!("bind mount {}", self.target.display())
    }

    fn release(&mut self) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
        process::run(Command::new("umount").arg(&self.target))
            .with_context(|| format!("Failed to unmount {}", self.target.display()))?;
        self.mounted = false;
        Ok(())
    }
}
