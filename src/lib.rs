//! ubuntu-image - Resumable builder for bootable disk images
//!
//! This library builds disk images from a model assertion, a classic image
//! definition or a prepared gadget tree and rootfs. A build is an ordered
//! list of named steps whose progress is checkpointed so an interrupted or
//! failed build can be resumed.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Pipeline engine, build variants and partition synthesis
//! - [`infra`] - Infrastructure layer (filesystem, processes, disk tools)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
