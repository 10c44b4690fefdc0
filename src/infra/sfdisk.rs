//! Partition table writer using `sfdisk`
//!
//! A synthesized [`PartitionTable`] is rendered as an `sfdisk` script and fed
//! on stdin against the image file.

use anyhow::{bail, Result};
use std::fmt::Write as _;
use std::path::Path;
use std::process::Command;

use crate::core::gadget::Schema;
use crate::core::partition::PartitionTable;
use crate::infra::process;

/// Primary partitions a DOS table can describe
const MBR_PRIMARY_PARTITIONS: usize = 4;

/// Render the `sfdisk` script for a table
pub fn render_script(table: &PartitionTable) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "label: {}", table.schema.sfdisk_label());
    let _ = writeln!(script, "unit: sectors");
    let _ = writeln!(script, "sector-size: {}", table.sector_size);
    if table.schema == Schema::Gpt {
        let _ = writeln!(script, "first-lba: {}", table.first_usable_sector());
        let _ = writeln!(script, "last-lba: {}", table.last_usable_sector());
    }
    script.push('\n');

    for entry in &table.entries {
        let _ = write!(
            script,
            "start={}, size={}, type={}",
            entry.start_sector, entry.size_sectors, entry.type_code
        );
        if let Some(name) = &entry.name {
            let _ = write!(script, ", name=\"{}\"", name.replace('"', "'"));
        }
        if entry.bootable {
            script.push_str(", bootable");
        }
        script.push('\n');
    }
    script
}

/// Write a partition table into an existing image file
pub fn write_table(image: &Path, table: &PartitionTable) -> Result<()> {
    if table.schema == Schema::Mbr && table.entries.len() > MBR_PRIMARY_PARTITIONS {
        bail!(
            "MBR volumes support at most {MBR_PRIMARY_PARTITIONS} partitions, got {}",
            table.entries.len()
        );
    }
    process::require_tool("sfdisk")?;

    let script = render_script(table);
    tracing::debug!("sfdisk script for {}:\n{script}", image.display());
    let mut cmd = Command::new("sfdisk");
    cmd.args(["--quiet", "--no-reread", "--no-tell-kernel"])
        .arg(image);
    process::run_with_input(&mut cmd, Some(&script))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::partition::{PartitionEntry, TypeCode};
    use uuid::Uuid;

    fn table(schema: Schema) -> PartitionTable {
        PartitionTable {
            schema,
            sector_size: 512,
            physical_sector_size: 512,
            protective_mbr: schema == Schema::Gpt,
            total_sectors: 8192,
            entries: Vec::new(),
        }
    }

    #[test]
    fn test_gpt_script() {
        let mut table = table(Schema::Gpt);
        table.entries.push(PartitionEntry {
            number: 1,
            structure_index: 1,
            start_sector: 2048,
            size_sectors: 4096,
            type_code: TypeCode::Gpt(
                Uuid::parse_str("0fc63daf-8483-4772-8e79-3d69d8477de4").unwrap(),
            ),
            name: Some("writable".to_string()),
            bootable: false,
        });

        let script = render_script(&table);
        assert!(script.starts_with("label: gpt\nunit: sectors\nsector-size: 512\n"));
        assert!(script.contains("first-lba: 34\n"));
        assert!(script.contains("last-lba: 8158\n"));
        assert!(script.contains(
            "start=2048, size=4096, type=0FC63DAF-8483-4772-8E79-3D69D8477DE4, name=\"writable\"\n"
        ));
    }

    #[test]
    fn test_mbr_script_marks_bootable() {
        let mut table = table(Schema::Mbr);
        table.entries.push(PartitionEntry {
            number: 1,
            structure_index: 0,
            start_sector: 2048,
            size_sectors: 1024,
            type_code: TypeCode::Mbr(0x0c),
            name: None,
            bootable: true,
        });

        let script = render_script(&table);
        assert!(script.starts_with("label: dos\n"));
        assert!(!script.contains("first-lba"));
        assert!(script.contains("start=2048, size=1024, type=0c, bootable\n"));
    }

    #[test]
    fn test_mbr_partition_limit() {
        let mut table = table(Schema::Mbr);
        for number in 1..=5 {
            table.entries.push(PartitionEntry {
                number,
                structure_index: number as usize,
                start_sector: 2048 * u64::from(number),
                size_sectors: 8,
                type_code: TypeCode::Mbr(0x83),
                name: None,
                bootable: false,
            });
        }
        let err = write_table(Path::new("/nonexistent.img"), &table).unwrap_err();
        assert!(err.to_string().contains("at most 4"));
    }
}
