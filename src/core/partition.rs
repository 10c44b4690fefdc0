//! Partition table synthesis
//!
//! Converts a [`Volume`] into a concrete MBR or GPT partition table for a
//! given sector size and image size. Structure offsets and sizes are
//! converted to sectors with ceiling division so a declared size is never
//! shrunk. GPT tables reserve the protective MBR, the primary header and
//! entry array at the start of the disk and the backup header and entry
//! array at the end; a structure reaching into either region is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::gadget::{LaidOutStructure, Role, Schema, Volume, VolumeStructure};
use crate::config::defaults::GPT_ENTRY_ARRAY_BYTES;
use crate::error::{GadgetError, PartitionError};

/// Default GPT partition name for the root filesystem
pub const DEFAULT_ROOTFS_PARTITION_NAME: &str = "writable";

/// Label that marks the boot partition even without a role
const SYSTEM_BOOT_LABEL: &str = "system-boot";

/// Sectors taken by the GPT partition entry array
pub fn gpt_entry_array_sectors(sector_size: u64) -> u64 {
    GPT_ENTRY_ARRAY_BYTES.div_ceil(sector_size)
}

/// Sectors reserved at the start of a GPT disk: protective MBR, header, entries
pub fn gpt_primary_sectors(sector_size: u64) -> u64 {
    1 + 1 + gpt_entry_array_sectors(sector_size)
}

/// Sectors reserved at the end of a GPT disk: backup entries and header
pub fn gpt_secondary_sectors(sector_size: u64) -> u64 {
    1 + gpt_entry_array_sectors(sector_size)
}

/// Number of sectors needed to hold `bytes`
pub fn bytes_to_sectors(bytes: u64, sector_size: u64) -> u64 {
    bytes.div_ceil(sector_size)
}

/// Whether a structure is provided by another mechanism in seeded builds
///
/// Seeded images only carry the seed; the installer creates the boot, data
/// and save partitions on first boot.
pub fn should_skip_structure(structure: &VolumeStructure, is_seeded: bool) -> bool {
    is_seeded
        && (matches!(
            structure.role,
            Role::SystemBoot | Role::SystemData | Role::SystemSave
        ) || structure.label.as_deref() == Some(SYSTEM_BOOT_LABEL))
}

/// Schema-specific partition type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeCode {
    /// MBR system id byte
    Mbr(u8),
    /// GPT partition type GUID
    Gpt(Uuid),
}

impl TypeCode {
    /// Resolve a declared structure type for the given schema
    ///
    /// Hybrid types are written as `"<mbr-code>,<gpt-guid>"`; MBR tables
    /// use the first token and GPT tables the second.
    pub fn resolve(structure: &VolumeStructure, schema: Schema) -> Result<Self, PartitionError> {
        let declared = structure.type_code.trim();
        let token = match (declared.split_once(','), schema) {
            (Some((mbr, _)), Schema::Mbr) => mbr.trim(),
            (Some((_, gpt)), Schema::Gpt) => gpt.trim(),
            (None, _) => declared,
        };
        let invalid = || PartitionError::InvalidType {
            structure: structure.display_name(),
            type_code: structure.type_code.clone(),
            schema: schema.to_string(),
        };
        match schema {
            Schema::Mbr => {
                let hex = token.trim_start_matches("0x");
                if hex.is_empty() || hex.len() > 2 {
                    return Err(invalid());
                }
                u8::from_str_radix(hex, 16).map(Self::Mbr).map_err(|_| invalid())
            }
            Schema::Gpt => Uuid::parse_str(token).map(Self::Gpt).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mbr(id) => write!(f, "{id:02x}"),
            Self::Gpt(guid) => write!(f, "{}", guid.hyphenated().to_string().to_uppercase()),
        }
    }
}

/// One row of a synthesized partition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// 1-based partition number
    pub number: u32,
    /// Index of the source structure in the volume
    pub structure_index: usize,
    /// First sector
    pub start_sector: u64,
    /// Length in sectors
    pub size_sectors: u64,
    /// Partition type
    pub type_code: TypeCode,
    /// Partition name (GPT only)
    pub name: Option<String>,
    /// Bootable flag (MBR only)
    pub bootable: bool,
}

impl PartitionEntry {
    /// Sector following the partition
    pub fn end_sector(&self) -> u64 {
        self.start_sector.saturating_add(self.size_sectors)
    }
}

/// A complete partition table ready to be written to an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    /// Table scheme
    pub schema: Schema,
    /// Logical sector size in bytes
    pub sector_size: u64,
    /// Physical sector size in bytes
    pub physical_sector_size: u64,
    /// Whether a protective MBR precedes the table (GPT only)
    pub protective_mbr: bool,
    /// Size of the disk in sectors
    pub total_sectors: u64,
    /// Partitions in structure order
    pub entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Bytes reserved for the table itself
    ///
    /// GPT reserves the primary and secondary regions; MBR a single sector.
    pub fn table_size(&self) -> u64 {
        match self.schema {
            Schema::Gpt => {
                (gpt_primary_sectors(self.sector_size) + gpt_secondary_sectors(self.sector_size))
                    * self.sector_size
            }
            Schema::Mbr => self.sector_size,
        }
    }

    /// First sector a partition may occupy
    pub fn first_usable_sector(&self) -> u64 {
        match self.schema {
            Schema::Gpt => gpt_primary_sectors(self.sector_size),
            Schema::Mbr => 1,
        }
    }

    /// Last sector a partition may occupy
    pub fn last_usable_sector(&self) -> u64 {
        match self.schema {
            Schema::Gpt => self
                .total_sectors
                .saturating_sub(gpt_secondary_sectors(self.sector_size))
                .saturating_sub(1),
            Schema::Mbr => self.total_sectors.saturating_sub(1),
        }
    }
}

/// Result of a synthesis: the table and the root filesystem partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedTable {
    /// Generated table
    pub table: PartitionTable,
    /// Partition number of the system-data entry (GPT only)
    pub rootfs_partition: Option<u32>,
}

/// Build the partition table for a volume
///
/// Raw structures (the MBR blob, `bare` regions) and structures that a
/// seeded build leaves to the installer get no entry. Entries are numbered
/// from 1 in structure order, independent of skipped structures.
pub fn synthesize(
    volume: &Volume,
    sector_size: u64,
    image_size: u64,
    is_seeded: bool,
) -> Result<SynthesizedTable, PartitionError> {
    if sector_size == 0 {
        return Err(PartitionError::ZeroSectorSize);
    }
    let layout = volume
        .layout()
        .map_err(|e| PartitionError::Layout(e.to_string()))?;

    let schema = volume.schema;
    let total_sectors = image_size / sector_size;
    let mut table = PartitionTable {
        schema,
        sector_size,
        physical_sector_size: sector_size,
        protective_mbr: schema == Schema::Gpt,
        total_sectors,
        entries: Vec::new(),
    };
    let mut rootfs_partition = None;
    let mut previous: Option<(&LaidOutStructure<'_>, u64)> = None;

    for laid_out in &layout {
        let structure = laid_out.structure;
        if !structure.is_partition() || should_skip_structure(structure, is_seeded) {
            tracing::debug!(
                "Skipping structure '{}' in volume '{}'",
                structure.display_name(),
                volume.name
            );
            continue;
        }

        let start_sector = bytes_to_sectors(laid_out.offset, sector_size);
        let size_sectors = bytes_to_sectors(laid_out.size, sector_size);
        let type_code = TypeCode::resolve(structure, schema)?;

        if let Some((prev, prev_end)) = previous {
            if start_sector < prev_end {
                return Err(PartitionError::StructureOverlap {
                    structure: structure.display_name(),
                    previous: prev.structure.display_name(),
                    start: start_sector,
                    previous_end: prev_end,
                });
            }
        }
        if schema == Schema::Gpt {
            check_gpt_overlap(laid_out, start_sector, size_sectors, sector_size, total_sectors)?;
        }

        let number = u32::try_from(table.entries.len() + 1).unwrap_or(u32::MAX);
        let name = match schema {
            Schema::Gpt => Some(gpt_partition_name(structure)),
            Schema::Mbr => None,
        };
        let bootable = schema == Schema::Mbr
            && (structure.role == Role::SystemBoot
                || structure.label.as_deref() == Some(SYSTEM_BOOT_LABEL));

        if schema == Schema::Gpt && structure.role == Role::SystemData {
            rootfs_partition = Some(number);
        }

        let entry = PartitionEntry {
            number,
            structure_index: laid_out.index,
            start_sector,
            size_sectors,
            type_code,
            name,
            bootable,
        };
        previous = Some((laid_out, entry.end_sector()));
        table.entries.push(entry);
    }

    Ok(SynthesizedTable {
        table,
        rootfs_partition,
    })
}

/// Reject structures that reach into the primary or secondary GPT regions
fn check_gpt_overlap(
    laid_out: &LaidOutStructure<'_>,
    start_sector: u64,
    size_sectors: u64,
    sector_size: u64,
    total_sectors: u64,
) -> Result<(), PartitionError> {
    let primary = gpt_primary_sectors(sector_size);
    let usable_end = total_sectors.saturating_sub(gpt_secondary_sectors(sector_size));
    let end = start_sector.saturating_add(size_sectors);
    if start_sector < primary || end > usable_end {
        return Err(PartitionError::GeometryOverlap {
            structure: laid_out.structure.display_name(),
            start: start_sector,
            end,
            first_usable: primary,
            last_usable: usable_end.saturating_sub(1),
        });
    }
    Ok(())
}

fn gpt_partition_name(structure: &VolumeStructure) -> String {
    if structure.name.is_empty() && structure.role == Role::SystemData {
        DEFAULT_ROOTFS_PARTITION_NAME.to_string()
    } else {
        structure.name.clone()
    }
}

/// Bytes needed for a volume: its last structure plus the GPT backup table
pub fn minimum_image_size(volume: &Volume, sector_size: u64) -> Result<u64, GadgetError> {
    let layout = volume.layout()?;
    let Some(last) = layout.iter().max_by_key(|l| l.end()) else {
        return Ok(match volume.schema {
            Schema::Gpt => gpt_secondary_sectors(sector_size) * sector_size,
            Schema::Mbr => 0,
        });
    };
    let reserved = match volume.schema {
        Schema::Gpt => gpt_secondary_sectors(sector_size),
        Schema::Mbr => 0,
    };
    (bytes_to_sectors(last.end(), sector_size) + reserved)
        .checked_mul(sector_size)
        .ok_or_else(|| GadgetError::LayoutOverflow {
            volume: volume.name.clone(),
            structure: last.structure.display_name(),
        })
}
