//! Infrastructure layer
//!
//! Handles all I/O operations: filesystem, external processes, partition
//! tables and filesystem images.
//! This module is the only place where side effects occur.

pub mod filesystem;
pub mod mkfs;
pub mod mount;
pub mod process;
pub mod sfdisk;
