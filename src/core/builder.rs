//! Image builder interface
//!
//! Every build variant owns a [`StateMachine`] and its own step list and
//! options. The pipeline operations are provided here and shared unchanged
//! between variants.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::context::BuildIdentity;
use crate::core::options::{CommonOptions, StateMachineOptions};
use crate::core::pipeline::{self, StateMachine, Step};
use crate::error::{BuildError, ConfigError};

/// A build variant driven by the step pipeline
pub trait ImageBuilder: Sized {
    /// Variant-specific checkpointed state
    type State: Serialize + DeserializeOwned + Default;

    /// Variant name recorded in the checkpoint
    fn kind(&self) -> &'static str;

    /// Ordered step list
    fn steps(&self) -> Vec<Step<Self>>;

    /// Options that must not change between a run and its resumption
    fn identity(&self) -> BuildIdentity;

    /// Engine state
    fn machine(&self) -> &StateMachine<Self::State>;

    /// Mutable engine state
    fn machine_mut(&mut self) -> &mut StateMachine<Self::State>;

    /// Check variant options before any step runs
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Set the options shared by every variant
    fn set_common_options(&mut self, common: CommonOptions, opts: StateMachineOptions) {
        self.machine_mut().set_options(common, opts);
    }

    /// Prepare the working directory and build context
    fn setup(&mut self) -> Result<(), BuildError> {
        pipeline::setup(self)
    }

    /// Run the pending steps
    fn run(&mut self) -> Result<(), BuildError> {
        pipeline::run(self)
    }

    /// Release resources and clean up
    fn teardown(&mut self) -> Result<(), BuildError> {
        pipeline::teardown(self)
    }
}

/// Names of a variant's steps, in order
pub fn step_names<B: ImageBuilder>(builder: &B) -> Vec<String> {
    builder.steps().into_iter().map(|s| s.name).collect()
}
