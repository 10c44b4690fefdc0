//! Core build logic
//!
//! This module contains the build pipeline, the gadget model and the
//! partition table synthesizer. Side effects go through [`crate::infra`].
//!
//! # Submodules
//!
//! - [`gadget`] - Gadget definition: volumes and structures
//! - [`partition`] - MBR/GPT partition table synthesis
//! - [`options`] - Build options and their defaults
//! - [`context`] - Checkpointed build context
//! - [`pipeline`] - Step engine with until/thru/resume
//! - [`builder`] - Interface shared by the build variants
//! - [`steps`] - Steps shared by the build variants
//! - [`snap`] - Images from a model assertion
//! - [`classic`] - Images from an image definition
//! - [`pack`] - Images from a prepared gadget and rootfs
//! - [`image_definition`] - Classic image definition document

pub mod builder;
pub mod classic;
pub mod context;
pub mod gadget;
pub mod image_definition;
pub mod options;
pub mod pack;
pub mod partition;
pub mod pipeline;
pub mod snap;
pub mod steps;
