//! Build options
//!
//! Options are populated by the CLI and then normalized through an explicit
//! `apply_defaults` per struct. Values that cannot be defaulted are checked
//! by `validate` before the pipeline is set up.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::defaults::{DEFAULT_OUTPUT_DIR, DEFAULT_SECTOR_SIZE, SUPPORTED_SECTOR_SIZES};
use crate::core::gadget::Size;
use crate::error::ConfigError;

/// Options shared by every build variant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonOptions {
    /// Directory receiving the final artifacts
    pub output_dir: Option<PathBuf>,
    /// `--image-size` value: one size, or `volume:size` pairs
    pub image_size: Option<String>,
    /// File copied to `.disk/info` in the rootfs
    pub disk_info: Option<PathBuf>,
    /// Logical sector size in bytes (0 means unset)
    pub sector_size: u64,
}

impl CommonOptions {
    /// Fill unset values with their defaults
    pub fn apply_defaults(&mut self) {
        if self.output_dir.is_none() {
            self.output_dir = Some(PathBuf::from(DEFAULT_OUTPUT_DIR));
        }
        if self.sector_size == 0 {
            self.sector_size = DEFAULT_SECTOR_SIZE;
        }
    }

    /// Check values that have no sensible default
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_SECTOR_SIZES.contains(&self.sector_size) {
            return Err(ConfigError::InvalidSectorSize {
                size: self.sector_size,
                supported: SUPPORTED_SECTOR_SIZES.to_vec(),
            });
        }
        if let Some(value) = &self.image_size {
            ImageSizes::parse(value)?;
        }
        Ok(())
    }

    /// Output directory after defaulting
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    /// Parsed `--image-size`
    pub fn image_sizes(&self) -> Result<ImageSizes, ConfigError> {
        self.image_size
            .as_deref()
            .map_or(Ok(ImageSizes::Computed), ImageSizes::parse)
    }
}

/// Options controlling the pipeline itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMachineOptions {
    /// Working directory; an ephemeral one is created when unset
    pub work_dir: Option<PathBuf>,
    /// Stop before this step
    pub until: Option<String>,
    /// Stop after this step
    pub thru: Option<String>,
    /// Continue from the checkpoint in `work_dir`
    pub resume: bool,
}

impl StateMachineOptions {
    /// Normalize the stop points
    ///
    /// Empty step names count as unset. When `until` and `thru` name the
    /// same step only `thru` is kept.
    pub fn apply_defaults(&mut self) {
        if self.until.as_deref().is_some_and(str::is_empty) {
            self.until = None;
        }
        if self.thru.as_deref().is_some_and(str::is_empty) {
            self.thru = None;
        }
        if self.until.is_some() && self.until == self.thru {
            self.until = None;
        }
    }

    /// Check option combinations
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resume && self.work_dir.is_none() {
            return Err(ConfigError::ResumeWithoutWorkdir);
        }
        if let (Some(until), Some(thru)) = (&self.until, &self.thru) {
            return Err(ConfigError::ConflictingStopPoints {
                until: until.clone(),
                thru: thru.clone(),
            });
        }
        Ok(())
    }
}

/// Target image sizes requested on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSizes {
    /// Use the size computed from the gadget
    Computed,
    /// One size for every volume
    All(u64),
    /// Sizes per volume name; other volumes use the computed size
    PerVolume(IndexMap<String, u64>),
}

impl ImageSizes {
    /// Parse `4G` or `pc:4G,other:1G`
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidImageSize {
            value: value.to_string(),
            reason,
        };
        if !value.contains(':') {
            let size = Size::parse(value).map_err(|e| invalid(e.to_string()))?;
            return Ok(Self::All(size.bytes()));
        }

        let mut sizes = IndexMap::new();
        for pair in value.split(',') {
            let (name, size) = pair
                .split_once(':')
                .ok_or_else(|| invalid(format!("'{pair}' is not a volume:size pair")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid(format!("'{pair}' has no volume name")));
            }
            let size = Size::parse(size).map_err(|e| invalid(e.to_string()))?;
            if sizes.insert(name.to_string(), size.bytes()).is_some() {
                return Err(invalid(format!("volume '{name}' is given twice")));
            }
        }
        Ok(Self::PerVolume(sizes))
    }

    /// Requested size for a volume, if any
    pub fn for_volume(&self, volume: &str) -> Option<u64> {
        match self {
            Self::Computed => None,
            Self::All(size) => Some(*size),
            Self::PerVolume(sizes) => sizes.get(volume).copied(),
        }
    }
}

/// Options for images built from a model assertion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapOptions {
    /// Model assertion file
    pub model_assertion: PathBuf,
    /// Extra snaps to seed (`name` or `name=channel`)
    pub snaps: Vec<String>,
    /// Default channel
    pub channel: Option<String>,
}

impl SnapOptions {
    /// Fill unset values with their defaults
    pub fn apply_defaults(&mut self) {
        if self.channel.as_deref().is_some_and(str::is_empty) {
            self.channel = None;
        }
        self.snaps.retain(|s| !s.trim().is_empty());
    }
}

/// Options for images built from an image definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassicOptions {
    /// Image definition document
    pub image_definition: PathBuf,
}

impl ClassicOptions {
    /// Fill unset values with their defaults
    pub fn apply_defaults(&mut self) {}
}

/// Disk artifact produced by a pack build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    /// Raw disk image
    #[default]
    Raw,
    /// QEMU copy-on-write image
    Qcow2,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Qcow2 => f.write_str("qcow2"),
        }
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "qcow2" => Ok(Self::Qcow2),
            other => Err(format!("unknown artifact type '{other}' (expected raw or qcow2)")),
        }
    }
}

/// Options for images packed from a prepared gadget tree and rootfs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackOptions {
    /// Prepared gadget tree
    pub gadget_dir: PathBuf,
    /// Prepared root filesystem
    pub rootfs_dir: PathBuf,
    /// Disk artifact to produce
    pub artifact_type: ArtifactType,
}
