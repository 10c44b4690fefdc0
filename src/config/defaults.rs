//! Default configuration values

/// Checkpoint file written under the working directory
pub const CHECKPOINT_FILE: &str = "ubuntu-image.json";

/// Checkpoint format version understood by this build
pub const CHECKPOINT_VERSION: u32 = 1;

/// Default logical sector size in bytes
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Sector sizes the partition table writer supports
pub const SUPPORTED_SECTOR_SIZES: &[u64] = &[512, 4096];

/// Structures other than the MBR never start before this offset
pub const NON_MBR_START_OFFSET: u64 = 1024 * 1024;

/// Size of the GPT partition entry array, fixed regardless of sector size
pub const GPT_ENTRY_ARRAY_BYTES: u64 = 16 * 1024;

/// Rootfs contents are padded by this factor before sizing the partition
pub const ROOTFS_PADDING_NUMERATOR: u64 = 3;
/// Denominator for [`ROOTFS_PADDING_NUMERATOR`]
pub const ROOTFS_PADDING_DENOMINATOR: u64 = 2;

/// Rootfs sizes are rounded up to this alignment
pub const ROOTFS_SIZE_ALIGNMENT: u64 = 1024 * 1024;

/// Gadget definition location inside a gadget tree
pub const GADGET_DEFINITION: &str = "meta/gadget.toml";

/// Default output directory
pub const DEFAULT_OUTPUT_DIR: &str = ".";

/// Prefix for ephemeral working directories
pub const WORKDIR_PREFIX: &str = "ubuntu-image-";
