//! Error types for ubuntu-image
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or contradictory options, detected before any step runs
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Resume requested without a workdir to find the checkpoint in
    #[error("--resume requires --workdir: the checkpoint location is unknown otherwise")]
    ResumeWithoutWorkdir,

    /// `--until` and `--thru` name different steps
    #[error("--until '{until}' and --thru '{thru}' cannot be combined; use one of them")]
    ConflictingStopPoints { until: String, thru: String },

    /// Working directory does not exist
    #[error("Working directory not found: {path}")]
    WorkdirNotFound { path: PathBuf },

    /// Working directory cannot be written to
    #[error("Working directory '{path}' is not writable: {error}")]
    WorkdirNotWritable { path: PathBuf, error: String },

    /// No checkpoint to resume from
    #[error("No checkpoint found at '{path}'. Nothing to resume")]
    CheckpointNotFound { path: PathBuf },

    /// The resumed invocation differs from the checkpointed one
    #[error("Cannot resume: {field} was '{original}' but is now '{requested}'")]
    ResumeMismatch {
        field: String,
        original: String,
        requested: String,
    },

    /// The step list changed since the checkpoint was written
    #[error("Cannot resume: the {kind} step list changed since the checkpoint was written")]
    StepListChanged { kind: String },

    /// Unknown step named in --until/--thru
    #[error("Unknown step '{name}' for --{flag}. Valid steps: {}", valid.join(", "))]
    UnknownStep {
        flag: String,
        name: String,
        valid: Vec<String>,
    },

    /// Unsupported sector size
    #[error("Unsupported sector size {size}: must be one of {supported:?}")]
    InvalidSectorSize { size: u64, supported: Vec<u64> },

    /// Malformed --image-size value
    #[error("Invalid image size '{value}': {reason}")]
    InvalidImageSize { value: String, reason: String },

    /// A required input file is missing
    #[error("{what} not found: {path}")]
    MissingInput { what: String, path: PathBuf },
}

/// Partition table synthesis errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Structure collides with the reserved GPT header regions
    #[error(
        "Structure '{structure}' occupies sectors {start}..{end}, which overlaps the GPT \
         header or backup table (usable sectors are {first_usable}..{last_usable})"
    )]
    GeometryOverlap {
        structure: String,
        start: u64,
        end: u64,
        first_usable: u64,
        last_usable: u64,
    },

    /// Structure starts before the previous partition ends
    #[error(
        "Structure '{structure}' starts at sector {start}, inside '{previous}' which ends at \
         sector {previous_end}"
    )]
    StructureOverlap {
        structure: String,
        previous: String,
        start: u64,
        previous_end: u64,
    },

    /// Structure type cannot be used with the volume schema
    #[error("Structure '{structure}' has type '{type_code}' which is not a valid {schema} type")]
    InvalidType {
        structure: String,
        type_code: String,
        schema: String,
    },

    /// Volume structures cannot be laid out
    #[error("Invalid volume layout: {0}")]
    Layout(String),

    /// Sector size of zero
    #[error("Sector size must be greater than zero")]
    ZeroSectorSize,
}

/// Gadget definition errors
#[derive(Error, Debug)]
pub enum GadgetError {
    /// Failed to read the gadget definition
    #[error("Failed to read gadget definition '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Failed to parse the gadget definition
    #[error("Failed to parse gadget definition '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Gadget declares no volumes
    #[error("Gadget definition '{path}' declares no volumes")]
    NoVolumes { path: PathBuf },

    /// Structure without any size information
    #[error("Structure '{structure}' in volume '{volume}' has neither size nor min-size")]
    MissingSize { volume: String, structure: String },

    /// Structure offsets or sizes do not fit in 64 bits
    #[error("Structure '{structure}' in volume '{volume}' extends past the largest possible volume")]
    LayoutOverflow { volume: String, structure: String },

    /// Invalid size string
    #[error("Invalid size '{0}'")]
    InvalidSize(String),
}

/// Checkpoint persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Failed to read the checkpoint
    #[error("Failed to read checkpoint '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Failed to write the checkpoint
    #[error("Failed to write checkpoint '{path}': {error}")]
    Write { path: PathBuf, error: String },

    /// Checkpoint content could not be decoded
    #[error("Failed to parse checkpoint '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Checkpoint could not be encoded
    #[error("Failed to serialize checkpoint: {error}")]
    Serialize { error: String },

    /// Checkpoint written by an incompatible format version
    #[error("Checkpoint '{path}' has format version {found}, only version {supported} is supported")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

/// Filesystem operation errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to copy file
    #[error("Failed to copy '{from}' to '{to}': {error}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },
}

/// Classic image definition errors
#[derive(Error, Debug)]
pub enum ImageDefinitionError {
    /// Failed to read the definition
    #[error("Failed to read image definition '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Failed to parse the definition
    #[error("Failed to parse image definition '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Rootfs section specifies no way to build the rootfs
    #[error("Image definition must set exactly one of rootfs.tarball or rootfs.archive")]
    RootfsSource,

    /// Artifact requested that needs a gadget
    #[error("Artifact '{artifact}' requires a gadget in the image definition")]
    ArtifactNeedsGadget { artifact: String },
}

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum BuildError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A pipeline step failed
    #[error("Step '{step}' failed")]
    Step {
        step: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Engine operation called out of order
    #[error("Invalid state: cannot {operation} while {status}")]
    InvalidState { operation: String, status: String },

    /// A scoped resource could not be released at teardown
    #[error("Failed to release {resource}: {error}")]
    Cleanup { resource: String, error: String },
}

impl BuildError {
    /// Wrap a step failure with the step name
    pub fn step(step: &str, error: anyhow::Error) -> Self {
        Self::Step {
            step: step.to_string(),
            source: error.into(),
        }
    }

    /// Name of the failed step, if this is a step failure
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}
