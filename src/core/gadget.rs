//! Gadget definition: volumes and their on-disk structures
//!
//! The gadget tree ships `meta/gadget.toml`, which declares one or more
//! volumes. Each volume is an ordered list of structures (raw blobs and
//! partitions) plus the partitioning schema used to describe them.
//!
//! ```toml
//! [volumes.pc]
//! schema = "gpt"
//! bootloader = "grub"
//!
//! [[volumes.pc.structure]]
//! name = "mbr"
//! type = "mbr"
//! role = "mbr"
//! size = 440
//! content = [{ image = "pc-boot.img" }]
//!
//! [[volumes.pc.structure]]
//! name = "ubuntu-data"
//! role = "system-data"
//! filesystem = "ext4"
//! type = "83,0FC63DAF-8483-4772-8E79-3D69D8477DE4"
//! size = "1G"
//! ```

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use crate::config::defaults::NON_MBR_START_OFFSET;
use crate::error::GadgetError;

/// A size in bytes, written as an integer or a string with a K/M/G suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Size(pub u64);

impl Size {
    /// Size in bytes
    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Parse a size string such as `4096`, `512K`, `1M` or `2G`
    pub fn parse(value: &str) -> Result<Self, GadgetError> {
        static SIZE_RE: OnceLock<Regex> = OnceLock::new();
        let re = SIZE_RE.get_or_init(|| {
            Regex::new(r"^\s*(\d+)\s*([KMG]?)\s*$").expect("size pattern is valid")
        });
        let caps = re
            .captures(value)
            .ok_or_else(|| GadgetError::InvalidSize(value.to_string()))?;
        let number: u64 = caps[1]
            .parse()
            .map_err(|_| GadgetError::InvalidSize(value.to_string()))?;
        let factor: u64 = match &caps[2] {
            "K" => 1 << 10,
            "M" => 1 << 20,
            "G" => 1 << 30,
            _ => 1,
        };
        number
            .checked_mul(factor)
            .map(Size)
            .ok_or_else(|| GadgetError::InvalidSize(value.to_string()))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Size {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Size(n)),
            Raw::Text(s) => Size::parse(&s).map_err(|_| {
                <D::Error as serde::de::Error>::invalid_value(
                    serde::de::Unexpected::Str(&s),
                    &"a size such as 4096, 512K, 1M or 2G",
                )
            }),
        }
    }
}

/// Partitioning schema of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// GUID partition table with protective MBR
    #[default]
    Gpt,
    /// DOS master boot record
    Mbr,
}

impl Schema {
    /// Label used by `sfdisk` scripts
    pub fn sfdisk_label(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Mbr => "dos",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpt => f.write_str("gpt"),
            Self::Mbr => f.write_str("mbr"),
        }
    }
}

/// Semantic role of a structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// No particular role
    #[default]
    #[serde(rename = "", alias = "none")]
    None,
    /// Raw MBR boot code
    Mbr,
    /// Boot partition
    SystemBoot,
    /// Recovery/install seed
    SystemSeed,
    /// Root filesystem
    SystemData,
    /// Persistent save data
    SystemSave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Mbr => "mbr",
            Self::SystemBoot => "system-boot",
            Self::SystemSeed => "system-seed",
            Self::SystemData => "system-data",
            Self::SystemSave => "system-save",
        };
        f.write_str(name)
    }
}

/// One content entry of a structure
///
/// Filesystem structures use `source`/`target` pairs copied from the gadget
/// tree; raw structures use `image` blobs written at an optional offset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VolumeContent {
    /// Source path relative to the gadget tree
    #[serde(default)]
    pub source: Option<String>,
    /// Target path inside the filesystem
    #[serde(default)]
    pub target: Option<String>,
    /// Raw image relative to the gadget tree
    #[serde(default)]
    pub image: Option<String>,
    /// Offset of the raw image inside the structure
    #[serde(default)]
    pub offset: Option<Size>,
}

/// One declared region of a volume
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VolumeStructure {
    /// Structure name, also used as the GPT partition name
    #[serde(default)]
    pub name: String,
    /// Filesystem label
    #[serde(default, alias = "filesystem-label")]
    pub label: Option<String>,
    /// Byte offset from the start of the volume; unset means "after previous"
    #[serde(default)]
    pub offset: Option<Size>,
    /// Size in bytes
    #[serde(default)]
    pub size: Option<Size>,
    /// Minimum size in bytes
    #[serde(default)]
    pub min_size: Option<Size>,
    /// Type code: MBR hex byte, GPT GUID, `"<mbr>,<guid>"`, `bare` or `mbr`
    #[serde(default, rename = "type")]
    pub type_code: String,
    /// Semantic role
    #[serde(default)]
    pub role: Role,
    /// Filesystem to create (`ext4`, `vfat`); unset for raw structures
    #[serde(default)]
    pub filesystem: Option<String>,
    /// Structure contents
    #[serde(default)]
    pub content: Vec<VolumeContent>,
}

impl VolumeStructure {
    /// Effective size: `size`, falling back to `min-size`
    pub fn effective_size(&self) -> Option<u64> {
        self.size.or(self.min_size).map(Size::bytes)
    }

    /// Whether the structure is the raw MBR boot blob
    pub fn is_mbr(&self) -> bool {
        self.role == Role::Mbr || self.type_code == "mbr"
    }

    /// Whether the structure is represented in the partition table
    pub fn is_partition(&self) -> bool {
        !self.is_mbr() && self.type_code != "bare"
    }

    /// Whether the structure carries a filesystem
    pub fn has_filesystem(&self) -> bool {
        self.filesystem.as_deref().is_some_and(|fs| !fs.is_empty() && fs != "none")
    }

    /// Name used in diagnostics, falling back to the role
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.role.to_string()
        } else {
            self.name.clone()
        }
    }
}

/// A structure with its offset and size resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaidOutStructure<'a> {
    /// Position in the volume's structure list
    pub index: usize,
    /// Declared structure
    pub structure: &'a VolumeStructure,
    /// Start offset in bytes
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

impl LaidOutStructure<'_> {
    /// End offset in bytes (exclusive)
    ///
    /// [`Volume::layout`] only yields structures whose end fits in a `u64`.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// A named ordered sequence of structures
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name (the key in the gadget definition)
    #[serde(default)]
    pub name: String,
    /// Partitioning schema
    #[serde(default)]
    pub schema: Schema,
    /// Bootloader identifier
    #[serde(default)]
    pub bootloader: Option<String>,
    /// Ordered structures
    #[serde(default, rename = "structure")]
    pub structures: Vec<VolumeStructure>,
}

impl Volume {
    /// Resolve offsets and sizes of every structure
    ///
    /// A structure without an explicit offset starts where the previous one
    /// ended; anything that is not the MBR blob starts at 1 MiB at the
    /// earliest.
    pub fn layout(&self) -> Result<Vec<LaidOutStructure<'_>>, GadgetError> {
        let mut previous_end = 0u64;
        let mut laid_out = Vec::with_capacity(self.structures.len());
        for (index, structure) in self.structures.iter().enumerate() {
            let size = structure
                .effective_size()
                .ok_or_else(|| GadgetError::MissingSize {
                    volume: self.name.clone(),
                    structure: structure.display_name(),
                })?;
            let offset = match structure.offset {
                Some(offset) => offset.bytes(),
                None if structure.is_mbr() => previous_end,
                None => previous_end.max(NON_MBR_START_OFFSET),
            };
            previous_end = offset.checked_add(size).ok_or_else(|| GadgetError::LayoutOverflow {
                volume: self.name.clone(),
                structure: structure.display_name(),
            })?;
            laid_out.push(LaidOutStructure {
                index,
                structure,
                offset,
                size,
            });
        }
        Ok(laid_out)
    }

    /// Whether the volume carries a seed partition (installer-driven layout)
    pub fn is_seeded(&self) -> bool {
        self.structures.iter().any(|s| s.role == Role::SystemSeed)
    }

}

/// Parsed gadget definition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GadgetInfo {
    /// Volumes in declaration order
    #[serde(default)]
    pub volumes: IndexMap<String, Volume>,
}

impl GadgetInfo {
    /// Parse a gadget definition from TOML
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let mut info: Self = toml::from_str(content)?;
        for (name, volume) in &mut info.volumes {
            volume.name.clone_from(name);
        }
        Ok(info)
    }

    /// Load and validate a gadget definition file
    pub fn load(path: &Path) -> Result<Self, GadgetError> {
        let content = std::fs::read_to_string(path).map_err(|e| GadgetError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let info = Self::from_toml(&content).map_err(|e| GadgetError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        if info.volumes.is_empty() {
            return Err(GadgetError::NoVolumes {
                path: path.to_path_buf(),
            });
        }
        for volume in info.volumes.values() {
            volume.layout()?;
        }
        Ok(info)
    }

    /// Whether any volume is seeded
    pub fn is_seeded(&self) -> bool {
        self.volumes.values().any(Volume::is_seeded)
    }
}
