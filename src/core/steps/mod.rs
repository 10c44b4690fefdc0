//! Steps shared by the build variants
//!
//! Every step takes the whole builder and mutates its build context. Steps
//! overwrite their outputs instead of appending so a step repeated by
//! `--resume` produces the same result.

pub mod disk;
pub mod gadget;
pub mod partitions;
pub mod rootfs;
pub mod workdir;

pub use disk::{convert_disks_to_qcow2, make_disk};
pub use gadget::{load_gadget_yaml, set_artifact_names};
pub use partitions::{populate_bootfs_contents, populate_prepare_partitions};
pub use rootfs::{calculate_rootfs_size, generate_disk_info};
pub use workdir::make_temporary_directories;
