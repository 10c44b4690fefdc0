//! Resumable step pipeline
//!
//! A build is an ordered list of named [`Step`]s executed against one
//! [`StateMachine`]. The machine goes through
//! `Created → Ready → Running → {StoppedEarly | Completed | Failed} → TornDown`:
//!
//! - [`setup`] resolves the working directory and either creates a fresh
//!   [`BuildContext`] or loads and validates the checkpoint for `--resume`.
//! - [`run`] executes steps from the checkpointed index, saving the context
//!   after every step, stopping before `until` or after `thru`.
//! - [`teardown`] releases scoped resources and removes an ephemeral working
//!   directory once the build completed.
//!
//! A failed step leaves the index pointing at itself so the next `--resume`
//! repeats exactly that step.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::defaults::WORKDIR_PREFIX;
use crate::core::builder::ImageBuilder;
use crate::core::context::{checkpoint_path, BuildContext, WorkDirs};
use crate::core::options::{CommonOptions, StateMachineOptions};
use crate::error::{BuildError, ConfigError, PersistenceError};
use crate::infra::filesystem;

/// Step body
pub type StepFn<B> = fn(&mut B) -> anyhow::Result<()>;

/// A named pipeline step
pub struct Step<B> {
    /// Name used by `--until`/`--thru` and in diagnostics
    pub name: String,
    /// Step body
    pub run: StepFn<B>,
}

impl<B> Step<B> {
    /// Create a step
    pub fn new(name: impl Into<String>, run: StepFn<B>) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }
}

impl<B> Clone for Step<B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            run: self.run,
        }
    }
}

impl<B> fmt::Debug for Step<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Lifecycle of a state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Constructed, options not yet resolved
    Created,
    /// Setup done, ready to run
    Ready,
    /// Steps executing
    Running,
    /// Stopped by `--until` or `--thru`
    StoppedEarly,
    /// Every step ran
    Completed,
    /// A step or checkpoint write failed
    Failed,
    /// Teardown done
    TornDown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::StoppedEarly => "stopped early",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

/// Something a step acquired that must be released at teardown
pub trait ScopedResource: fmt::Debug {
    /// Short description for diagnostics
    fn describe(&self) -> String;

    /// Release the resource
    fn release(&mut self) -> anyhow::Result<()>;
}

/// Engine state owned by every build variant
#[derive(Debug)]
pub struct StateMachine<T> {
    common_opts: CommonOptions,
    opts: StateMachineOptions,
    work_dir: PathBuf,
    ephemeral: bool,
    status: Status,
    resources: Vec<Box<dyn ScopedResource>>,
    /// Checkpointed state
    pub context: BuildContext<T>,
}

impl<T> Default for StateMachine<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    fn default() -> Self {
        Self {
            common_opts: CommonOptions::default(),
            opts: StateMachineOptions::default(),
            work_dir: PathBuf::new(),
            ephemeral: false,
            status: Status::Created,
            resources: Vec::new(),
            context: BuildContext::default(),
        }
    }
}

impl<T> StateMachine<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Create a state machine with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the common and pipeline options, applying their defaults
    pub fn set_options(&mut self, mut common: CommonOptions, mut opts: StateMachineOptions) {
        common.apply_defaults();
        opts.apply_defaults();
        self.common_opts = common;
        self.opts = opts;
    }

    /// Options shared by all variants
    pub fn common_options(&self) -> &CommonOptions {
        &self.common_opts
    }

    /// Pipeline options
    pub fn options(&self) -> &StateMachineOptions {
        &self.opts
    }

    /// Resolved working directory (empty before setup)
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Whether the working directory is removed after a completed build
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Current lifecycle status
    pub fn status(&self) -> Status {
        self.status
    }

    /// Working directory layout, available once `make-temporary-directories` ran
    pub fn dirs(&self) -> anyhow::Result<&WorkDirs> {
        self.context
            .common
            .dirs
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("working directories have not been created"))
    }

    /// Variant state
    pub fn state(&self) -> &T {
        &self.context.state
    }

    /// Mutable variant state
    pub fn state_mut(&mut self) -> &mut T {
        &mut self.context.state
    }

    /// Hand a resource to the engine for release at teardown
    pub fn register_resource(&mut self, resource: Box<dyn ScopedResource>) {
        tracing::debug!("Registered {}", resource.describe());
        self.resources.push(resource);
    }

    /// Release every registered resource, most recent first
    ///
    /// All resources are attempted; the first failure is returned.
    pub fn release_resources(&mut self) -> Result<(), BuildError> {
        let mut first_error = None;
        while let Some(mut resource) = self.resources.pop() {
            let description = resource.describe();
            tracing::debug!("Releasing {description}");
            if let Err(e) = resource.release() {
                tracing::warn!("Failed to release {description}: {e:#}");
                first_error.get_or_insert(BuildError::Cleanup {
                    resource: description,
                    error: format!("{e:#}"),
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Number of resources currently held
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Write the checkpoint
    pub fn save(&self) -> Result<PathBuf, PersistenceError> {
        self.context.save(&self.work_dir)
    }

    fn expect_status(&self, allowed: &[Status], operation: &str) -> Result<(), BuildError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(BuildError::InvalidState {
                operation: operation.to_string(),
                status: self.status.to_string(),
            })
        }
    }
}

/// Resolve the working directory and prepare the build context
pub fn setup<B: ImageBuilder>(builder: &mut B) -> Result<(), BuildError> {
    builder.machine().expect_status(&[Status::Created], "set up")?;

    let steps = builder.steps();
    let names: Vec<String> = steps.iter().map(|s| s.name.clone()).collect();
    let identity = builder.identity();

    {
        let machine = builder.machine();
        machine.opts.validate()?;
        machine.common_opts.validate()?;
        for (flag, name) in [("until", &machine.opts.until), ("thru", &machine.opts.thru)] {
            if let Some(name) = name {
                if !names.contains(name) {
                    return Err(ConfigError::UnknownStep {
                        flag: flag.to_string(),
                        name: name.clone(),
                        valid: names.clone(),
                    }
                    .into());
                }
            }
        }
    }
    builder.validate()?;

    let machine = builder.machine_mut();
    if machine.opts.resume {
        let work_dir = machine
            .opts
            .work_dir
            .clone()
            .ok_or(ConfigError::ResumeWithoutWorkdir)?;
        if !work_dir.is_dir() {
            return Err(ConfigError::WorkdirNotFound { path: work_dir }.into());
        }
        filesystem::ensure_writable(&work_dir)?;

        let path = checkpoint_path(&work_dir);
        if !path.is_file() {
            return Err(ConfigError::CheckpointNotFound { path }.into());
        }
        let context = BuildContext::<B::State>::load(&path)?;
        context.identity.check_resume(&identity)?;
        if context.steps != names {
            return Err(ConfigError::StepListChanged {
                kind: identity.kind,
            }
            .into());
        }
        tracing::info!(
            "Resuming {} build in {} at step {}/{}",
            context.identity.kind,
            work_dir.display(),
            context.next_step,
            context.steps.len()
        );
        machine.context = context;
        machine.work_dir = work_dir;
        machine.ephemeral = false;
    } else {
        match machine.opts.work_dir.clone() {
            Some(work_dir) => {
                filesystem::create_dir_all(&work_dir).map_err(|e| {
                    ConfigError::WorkdirNotWritable {
                        path: work_dir.clone(),
                        error: e.to_string(),
                    }
                })?;
                filesystem::ensure_writable(&work_dir)?;
                machine.work_dir = work_dir;
                machine.ephemeral = false;
            }
            None => {
                let work_dir = filesystem::create_ephemeral_dir(WORKDIR_PREFIX).map_err(|e| {
                    ConfigError::WorkdirNotWritable {
                        path: std::env::temp_dir(),
                        error: e.to_string(),
                    }
                })?;
                machine.work_dir = work_dir;
                machine.ephemeral = true;
            }
        }
        tracing::debug!("Using working directory {}", machine.work_dir.display());
        machine.context = BuildContext::new(identity, names);
    }

    machine.status = Status::Ready;
    Ok(())
}

/// Execute steps from the checkpointed index
pub fn run<B: ImageBuilder>(builder: &mut B) -> Result<(), BuildError> {
    let steps = builder.steps();
    let (start, until, thru) = {
        let machine = builder.machine_mut();
        machine.expect_status(&[Status::Ready], "run")?;
        machine.status = Status::Running;
        (
            machine.context.next_step,
            machine.opts.until.clone(),
            machine.opts.thru.clone(),
        )
    };

    for (index, step) in steps.iter().enumerate().skip(start) {
        if until.as_deref() == Some(step.name.as_str()) {
            tracing::info!("Stopping before step '{}'", step.name);
            return stop_early(builder.machine_mut());
        }

        tracing::info!("[{index}] {}", step.name);
        if let Err(error) = (step.run)(builder) {
            let machine = builder.machine_mut();
            machine.status = Status::Failed;
            if let Err(save_error) = machine.save() {
                tracing::warn!("Could not save checkpoint after failure: {save_error}");
            }
            return Err(BuildError::step(&step.name, error));
        }

        let machine = builder.machine_mut();
        machine.context.next_step = index + 1;
        if let Err(e) = machine.save() {
            machine.status = Status::Failed;
            return Err(e.into());
        }

        if thru.as_deref() == Some(step.name.as_str()) {
            tracing::info!("Stopping after step '{}'", step.name);
            return stop_early(machine);
        }
    }

    builder.machine_mut().status = Status::Completed;
    tracing::info!("Build completed");
    Ok(())
}

fn stop_early<T>(machine: &mut StateMachine<T>) -> Result<(), BuildError>
where
    T: Serialize + DeserializeOwned + Default,
{
    if let Err(e) = machine.save() {
        machine.status = Status::Failed;
        return Err(e.into());
    }
    machine.status = Status::StoppedEarly;
    Ok(())
}

/// Release resources and clean up an ephemeral working directory
pub fn teardown<B: ImageBuilder>(builder: &mut B) -> Result<(), BuildError> {
    let machine = builder.machine_mut();
    if machine.status == Status::TornDown {
        return Ok(());
    }

    let released = machine.release_resources();

    if machine.status == Status::Completed && machine.ephemeral {
        tracing::debug!(
            "Removing ephemeral working directory {}",
            machine.work_dir.display()
        );
        if let Err(e) = filesystem::remove_dir_all(&machine.work_dir) {
            tracing::warn!("{e}");
        }
    } else if machine.status != Status::Created && machine.status != Status::Completed {
        tracing::info!(
            "Working directory kept at {} (resume with --resume --workdir)",
            machine.work_dir.display()
        );
    }

    machine.status = Status::TornDown;
    released
}
