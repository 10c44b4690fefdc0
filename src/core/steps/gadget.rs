//! Gadget loading and artifact naming

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::defaults::GADGET_DEFINITION;
use crate::core::builder::ImageBuilder;
use crate::core::gadget::GadgetInfo;
use crate::infra::filesystem;

/// Load the gadget definition from the prepared gadget tree
///
/// Builds without a gadget skip this step.
pub fn load_gadget_yaml<B: ImageBuilder>(builder: &mut B) -> Result<()> {
    let machine = builder.machine_mut();
    if machine.context.common.without_gadget {
        tracing::info!("No gadget in this build, skipping gadget definition");
        return Ok(());
    }

    let path = machine.dirs()?.gadget.join(GADGET_DEFINITION);
    if !path.is_file() {
        bail!("Gadget definition not found at {}", path.display());
    }
    let gadget = GadgetInfo::load(&path)?;

    let common = &mut machine.context.common;
    common.is_seeded = gadget.is_seeded();
    tracing::info!(
        "Loaded gadget with volumes: {}",
        gadget.volumes.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    common
        .artifact_names
        .retain(|volume, _| gadget.volumes.contains_key(volume));
    common.gadget = Some(gadget);
    Ok(())
}

/// Pick the output file name of every volume
///
/// Names set earlier (for example by an image definition) are kept; other
/// volumes are written to `<volume>.img`.
pub fn set_artifact_names<B: ImageBuilder>(builder: &mut B) -> Result<()> {
    let common = &mut builder.machine_mut().context.common;
    let Some(gadget) = &common.gadget else {
        return Ok(());
    };
    for name in gadget.volumes.keys() {
        let artifact = common
            .artifact_names
            .entry(name.clone())
            .or_insert_with(|| format!("{name}.img"));
        if artifact.contains('/') {
            bail!("Artifact name '{artifact}' for volume '{name}' must be a plain file name");
        }
        tracing::debug!("Volume '{name}' will be written to {artifact}");
    }
    Ok(())
}

/// Copy a gadget tree into the working directory's gadget location
pub fn copy_gadget_tree<B: ImageBuilder>(builder: &B, source: &Path) -> Result<()> {
    let target = builder.machine().dirs()?.gadget.clone();
    if !source.is_dir() {
        bail!("Gadget tree not found at {}", source.display());
    }
    filesystem::recreate_dir(&target)?;
    let copied = filesystem::copy_dir_contents(source, &target)
        .with_context(|| format!("Failed to prepare gadget tree from {}", source.display()))?;
    tracing::debug!("Copied {copied} gadget entries");
    Ok(())
}
