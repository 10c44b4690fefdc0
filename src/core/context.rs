//! Build context and checkpoint persistence
//!
//! The [`BuildContext`] is the single value threaded through every step.
//! It is written to `<workdir>/ubuntu-image.json` as a full snapshot after
//! each step and whenever the pipeline stops, and read back on `--resume`.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::defaults::{CHECKPOINT_FILE, CHECKPOINT_VERSION};
use crate::core::gadget::GadgetInfo;
use crate::core::partition::SynthesizedTable;
use crate::error::{ConfigError, PersistenceError};

/// Options that determine which build a checkpoint belongs to
///
/// A resumed invocation must match the checkpointed identity exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildIdentity {
    /// Build variant (`snap`, `classic`, `pack`)
    pub kind: String,
    /// Logical sector size
    pub sector_size: u64,
    /// Key input locations by name
    #[serde(default)]
    pub inputs: IndexMap<String, String>,
}

impl BuildIdentity {
    /// Create an identity for a build variant
    pub fn new(kind: &str, sector_size: u64) -> Self {
        Self {
            kind: kind.to_string(),
            sector_size,
            inputs: IndexMap::new(),
        }
    }

    /// Record a key input
    #[must_use]
    pub fn with_input(mut self, name: &str, value: impl ToString) -> Self {
        self.inputs.insert(name.to_string(), value.to_string());
        self
    }

    /// Compare a resumed request against this checkpointed identity
    pub fn check_resume(&self, requested: &Self) -> Result<(), ConfigError> {
        let mismatch = |field: &str, original: String, requested: String| {
            Err(ConfigError::ResumeMismatch {
                field: field.to_string(),
                original,
                requested,
            })
        };
        if self.kind != requested.kind {
            return mismatch("build type", self.kind.clone(), requested.kind.clone());
        }
        if self.sector_size != requested.sector_size {
            return mismatch(
                "sector size",
                self.sector_size.to_string(),
                requested.sector_size.to_string(),
            );
        }
        for (name, original) in &self.inputs {
            let value = requested.inputs.get(name).cloned().unwrap_or_default();
            if *original != value {
                return mismatch(name, original.clone(), value);
            }
        }
        for (name, value) in &requested.inputs {
            if !self.inputs.contains_key(name) {
                return mismatch(name, String::new(), value.clone());
            }
        }
        Ok(())
    }
}

/// Directories created under the working directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkDirs {
    /// Root filesystem contents
    pub rootfs: PathBuf,
    /// Unpacked inputs (seed, gadget)
    pub unpack: PathBuf,
    /// Prepared gadget tree
    pub gadget: PathBuf,
    /// Per-structure contents staging area
    pub scratch: PathBuf,
    /// Per-structure partition images
    pub volumes: PathBuf,
}

impl WorkDirs {
    /// Layout under a working directory
    pub fn under(work_dir: &Path) -> Self {
        let unpack = work_dir.join("unpack");
        Self {
            rootfs: work_dir.join("root"),
            gadget: unpack.join("gadget"),
            unpack,
            scratch: work_dir.join("scratch"),
            volumes: work_dir.join("volumes"),
        }
    }

    /// Every directory, parents first
    pub fn all(&self) -> [&Path; 5] {
        [
            &self.rootfs,
            &self.unpack,
            &self.gadget,
            &self.scratch,
            &self.volumes,
        ]
    }

    /// Partition image of one structure
    pub fn part_image(&self, volume: &str, index: usize) -> PathBuf {
        self.volumes.join(volume).join(format!("part{index}.img"))
    }

    /// Contents staging directory of one structure
    pub fn part_contents(&self, volume: &str, index: usize) -> PathBuf {
        self.scratch.join(volume).join(format!("part{index}"))
    }
}

/// A disk image written for one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskImage {
    /// Image file
    pub path: PathBuf,
    /// Image size in bytes
    pub size: u64,
    /// Partition table written to the image
    pub partitions: SynthesizedTable,
}

/// State shared by all build variants
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonState {
    /// Working directory layout, set by `make-temporary-directories`
    #[serde(default)]
    pub dirs: Option<WorkDirs>,
    /// Build has no gadget; gadget-dependent steps do nothing
    #[serde(default)]
    pub without_gadget: bool,
    /// Loaded gadget definition (sizes may be grown by rootfs sizing)
    #[serde(default)]
    pub gadget: Option<GadgetInfo>,
    /// Whether the gadget carries a seed partition
    #[serde(default)]
    pub is_seeded: bool,
    /// Computed root filesystem size in bytes
    #[serde(default)]
    pub rootfs_size: Option<u64>,
    /// Output file name per volume
    #[serde(default)]
    pub artifact_names: IndexMap<String, String>,
    /// Disk images written so far, per volume
    #[serde(default)]
    pub disks: IndexMap<String, DiskImage>,
}

/// Checkpointed pipeline state
///
/// `T` carries the variant-specific fields. Unknown fields in a checkpoint
/// are ignored on read so newer writers stay readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext<T> {
    /// Checkpoint format version
    pub version: u32,
    /// Build the checkpoint belongs to
    pub identity: BuildIdentity,
    /// Step names of the variant, in order
    pub steps: Vec<String>,
    /// Index of the next step to run
    pub next_step: usize,
    /// Shared state
    #[serde(default)]
    pub common: CommonState,
    /// Variant state
    #[serde(default)]
    pub state: T,
}

/// Location of the checkpoint inside a working directory
pub fn checkpoint_path(work_dir: &Path) -> PathBuf {
    work_dir.join(CHECKPOINT_FILE)
}

impl<T> BuildContext<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Fresh context positioned at the first step
    pub fn new(identity: BuildIdentity, steps: Vec<String>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            identity,
            steps,
            next_step: 0,
            common: CommonState::default(),
            state: T::default(),
        }
    }

    /// Name of the step that runs next, if any
    pub fn next_step_name(&self) -> Option<&str> {
        self.steps.get(self.next_step).map(String::as_str)
    }

    /// Write the checkpoint atomically under `work_dir`
    pub fn save(&self, work_dir: &Path) -> Result<PathBuf, PersistenceError> {
        let path = checkpoint_path(work_dir);
        let write_error = |error: String| PersistenceError::Write {
            path: path.clone(),
            error,
        };

        let content = serde_json::to_string_pretty(self).map_err(|e| PersistenceError::Serialize {
            error: e.to_string(),
        })?;

        let mut file =
            tempfile::NamedTempFile::new_in(work_dir).map_err(|e| write_error(e.to_string()))?;
        file.write_all(content.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| write_error(e.to_string()))?;
        file.persist(&path)
            .map_err(|e| write_error(e.error.to_string()))?;

        tracing::debug!(
            "Saved checkpoint at step {}/{} to {}",
            self.next_step,
            self.steps.len(),
            path.display()
        );
        Ok(path)
    }

    /// Read a checkpoint, rejecting other format versions
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let content = std::fs::read_to_string(path).map_err(|e| PersistenceError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let parse_error = |e: serde_json::Error| PersistenceError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        };

        let raw: serde_json::Value = serde_json::from_str(&content).map_err(parse_error)?;
        let found = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        if found != u64::from(CHECKPOINT_VERSION) {
            return Err(PersistenceError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: u32::try_from(found).unwrap_or(u32::MAX),
                supported: CHECKPOINT_VERSION,
            });
        }

        let context: Self = serde_json::from_value(raw).map_err(parse_error)?;
        if context.next_step > context.steps.len() {
            return Err(PersistenceError::Parse {
                path: path.to_path_buf(),
                error: format!(
                    "next step {} is past the end of {} steps",
                    context.next_step,
                    context.steps.len()
                ),
            });
        }
        Ok(context)
    }
}
