//! Working directory preparation

use anyhow::Result;

use crate::core::builder::ImageBuilder;
use crate::core::context::WorkDirs;
use crate::infra::filesystem;

/// Create the working directory layout and record it in the context
pub fn make_temporary_directories<B: ImageBuilder>(builder: &mut B) -> Result<()> {
    let machine = builder.machine_mut();
    let dirs = WorkDirs::under(machine.work_dir());
    for dir in dirs.all() {
        filesystem::create_dir_all(dir)?;
    }
    tracing::debug!("Working directories ready under {}", machine.work_dir().display());
    machine.context.common.dirs = Some(dirs);
    Ok(())
}
